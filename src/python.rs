//! Python bindings: dtype dispatch, exception mapping and module init.

use ndarray::ArrayD;
use numpy::{Element, IntoPyArray, PyReadonlyArrayDyn, PyUntypedArray};
use pyo3::exceptions::PyException;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule};

use crate::context::ExecutionContext;
use crate::element::MeanElement;
use crate::error::MeanError;
use crate::metrics;
use crate::reduce::{compute_mean, Reduction};

pyo3::create_exception!(mean3, KernelError, PyException, "Base class for mean3 errors.");
pyo3::create_exception!(
    mean3,
    ShapeError,
    KernelError,
    "Invalid axis or window, or a mean over zero elements."
);
pyo3::create_exception!(
    mean3,
    AllocationError,
    KernelError,
    "The output buffer could not be allocated."
);
pyo3::create_exception!(
    mean3,
    ElementTypeError,
    KernelError,
    "The array dtype is not supported."
);
pyo3::create_exception!(
    mean3,
    WorkerError,
    KernelError,
    "A worker thread failed or the pool could not start."
);

fn to_pyerr(err: MeanError) -> PyErr {
    let message = err.to_string();
    match err {
        MeanError::Shape(_) => ShapeError::new_err(message),
        MeanError::Allocation { .. } => AllocationError::new_err(message),
        MeanError::UnsupportedType { .. } => ElementTypeError::new_err(message),
        MeanError::Worker { .. } | MeanError::ThreadPool(_) => WorkerError::new_err(message),
    }
}

fn as_ndarray<'py>(py: Python<'py>, obj: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>> {
    if obj.downcast::<PyUntypedArray>().is_ok() {
        return Ok(obj.clone());
    }
    py.import_bound("numpy")?.getattr("asarray")?.call1((obj,))
}

fn into_python<O>(py: Python<'_>, result: ArrayD<O>, reduction: Reduction) -> PyResult<PyObject>
where
    O: Element + IntoPy<PyObject> + Copy,
{
    if let Reduction::All { keepdims: false } = reduction {
        if let Some(&value) = result.iter().next() {
            return Ok(value.into_py(py));
        }
    }
    Ok(result.into_pyarray_bound(py).into_any().unbind())
}

/// Runs the kernel when `array` holds `T` elements, `Ok(None)` otherwise.
fn try_reduce<T>(
    py: Python<'_>,
    array: &Bound<'_, PyAny>,
    reduction: Reduction,
    ctx: &ExecutionContext,
) -> PyResult<Option<PyObject>>
where
    T: MeanElement + Element,
    T::Output: Element + IntoPy<PyObject>,
{
    let Ok(readonly) = array.extract::<PyReadonlyArrayDyn<'_, T>>() else {
        return Ok(None);
    };
    let view = readonly.as_array();
    let result = py
        .allow_threads(|| compute_mean(view, reduction, ctx))
        .map_err(to_pyerr)?;
    into_python(py, result, reduction).map(Some)
}

fn dispatch(py: Python<'_>, array: &Bound<'_, PyAny>, reduction: Reduction) -> PyResult<PyObject> {
    let ctx = ExecutionContext::global().map_err(to_pyerr)?;
    let array = as_ndarray(py, array)?;

    macro_rules! try_dtypes {
        ($($t:ty),+) => {
            $(
                if let Some(result) = try_reduce::<$t>(py, &array, reduction, &ctx)? {
                    return Ok(result);
                }
            )+
        };
    }
    try_dtypes!(f64, f32, i64, i32, u32, u8);

    let dtype = array.getattr("dtype")?.str()?.to_string();
    Err(to_pyerr(MeanError::UnsupportedType { dtype }))
}

/// Arithmetic mean of `array`, over all elements when `axis` is None.
#[pyfunction(name = "mean")]
#[pyo3(signature = (array, axis=None, keepdims=false))]
fn mean_py(
    py: Python<'_>,
    array: &Bound<'_, PyAny>,
    axis: Option<isize>,
    keepdims: bool,
) -> PyResult<PyObject> {
    let reduction = match axis {
        Some(axis) => Reduction::Axis { axis, keepdims },
        None => Reduction::All { keepdims },
    };
    dispatch(py, array, reduction)
}

/// Mean of every full window of `window` consecutive elements along `axis`.
#[pyfunction(name = "moving_mean")]
#[pyo3(signature = (array, window=3, axis=-1))]
fn moving_mean_py(
    py: Python<'_>,
    array: &Bound<'_, PyAny>,
    window: isize,
    axis: isize,
) -> PyResult<PyObject> {
    let size = window_size(window).map_err(to_pyerr)?;
    dispatch(py, array, Reduction::Window { axis, size })
}

/// Python passes signed sizes; anything below one is a zero window.
fn window_size(window: isize) -> crate::error::Result<usize> {
    usize::try_from(window)
        .ok()
        .filter(|&size| size > 0)
        .ok_or_else(|| crate::error::ShapeError::ZeroWindow.into())
}

#[pyfunction(name = "simd_enabled")]
fn simd_enabled_py() -> PyResult<bool> {
    let ctx = ExecutionContext::global().map_err(to_pyerr)?;
    Ok(ctx.config().simd)
}

#[pyfunction(name = "threading_info")]
fn threading_info_py(py: Python<'_>) -> PyResult<PyObject> {
    let ctx = ExecutionContext::global().map_err(to_pyerr)?;
    let info = PyDict::new_bound(py);
    info.set_item("threads", ctx.threads())?;
    info.set_item("parallel_min_elements", ctx.config().parallel_min_elements)?;
    info.set_item("simd", ctx.config().simd)?;

    let usage = PyList::empty_bound(py);
    for entry in metrics::snapshot() {
        let entry_dict = PyDict::new_bound(py);
        entry_dict.set_item("operation", entry.operation)?;
        entry_dict.set_item("dtype", entry.dtype)?;
        entry_dict.set_item("path", entry.path)?;
        entry_dict.set_item("count", entry.count)?;
        usage.append(entry_dict)?;
    }
    info.set_item("usage", usage)?;

    if let Some(event) = metrics::last_event() {
        let event_dict = PyDict::new_bound(py);
        event_dict.set_item("operation", event.operation)?;
        event_dict.set_item("dtype", event.dtype)?;
        event_dict.set_item("path", event.path)?;
        event_dict.set_item("elements", event.elements)?;
        event_dict.set_item("outputs", event.outputs)?;
        event_dict.set_item("partitions", event.partitions)?;
        event_dict.set_item("duration_ms", event.duration_ms)?;
        info.set_item("last_event", event_dict)?;
    } else {
        info.set_item("last_event", py.None())?;
    }

    Ok(info.into())
}

/// Python module initialization for `mean3`.
#[pymodule]
#[pyo3(name = "mean3")]
fn _mean3(py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_wrapped(pyo3::wrap_pyfunction!(mean_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(moving_mean_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(simd_enabled_py))?;
    m.add_wrapped(pyo3::wrap_pyfunction!(threading_info_py))?;

    m.add("KernelError", py.get_type_bound::<KernelError>())?;
    m.add("ShapeError", py.get_type_bound::<ShapeError>())?;
    m.add("AllocationError", py.get_type_bound::<AllocationError>())?;
    m.add("ElementTypeError", py.get_type_bound::<ElementTypeError>())?;
    m.add("WorkerError", py.get_type_bound::<WorkerError>())?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("__doc__", "Parallel strided mean kernels for NumPy arrays.")?;

    Ok(())
}

pub fn init_test_module(py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    _mean3(py, module)
}
