use thiserror::Error;

/// Errors caused by the shape of the input or the requested reduction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("axis {axis} is out of bounds for array of dimension {ndim}")]
    AxisOutOfRange { axis: isize, ndim: usize },

    #[error("cannot compute the mean of zero elements (reduction length is 0)")]
    EmptyReduction,

    #[error("window size must be at least 1")]
    ZeroWindow,

    #[error("window size {window} exceeds length {len} of axis {axis}")]
    WindowTooLarge { window: usize, len: usize, axis: usize },

    #[error("output layout rejected: {0}")]
    Layout(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeanError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("could not allocate a buffer of {elements} elements")]
    Allocation { elements: usize },

    #[error("unsupported element type {dtype}; expected a floating-point or integer array")]
    UnsupportedType { dtype: String },

    #[error("worker for partition {partition} failed: {reason}")]
    Worker { partition: usize, reason: String },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, MeanError>;

/// Reserves exactly `len` slots and fills them with `value`, reporting
/// allocation failure instead of aborting.
pub(crate) fn try_filled<V: Clone>(len: usize, value: V) -> Result<Vec<V>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| MeanError::Allocation { elements: len })?;
    buffer.resize(len, value);
    Ok(buffer)
}
