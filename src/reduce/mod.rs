//! The mean kernel.
//!
//! Every reduction is described by a [`LaneMap`]: one strided input lane
//! per output position. Output positions are split into static, balanced
//! partitions (see [`partition::plan`]); each worker owns a disjoint chunk
//! of the freshly allocated output and walks its lanes through the real
//! input strides.

pub mod accumulate;
pub mod layout;
pub mod partition;

use std::slice;
use std::time::Instant;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use num_traits::Zero;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::element::MeanElement;
use crate::error::{try_filled, Result, ShapeError};
use crate::metrics::{self, KernelEvent};

use self::accumulate::{accumulate_run, strided_sum, KahanSum};
use self::layout::{checked_product, normalize_axis, Cursor, LaneMap};
use self::partition::{plan, Partition, PlanRequest};

/// Outputs handled per row-sweep block; bounds the per-worker scratch.
const ROW_SWEEP_BLOCK: usize = 512;

/// What to average.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    /// Mean of every element.
    All { keepdims: bool },
    /// Mean along one axis; negative axes count from the end.
    Axis { axis: isize, keepdims: bool },
    /// Mean of each run of `size` consecutive elements along `axis`.
    Window { axis: isize, size: usize },
}

impl Reduction {
    pub fn operation(&self) -> &'static str {
        match self {
            Reduction::All { .. } => "mean_all",
            Reduction::Axis { .. } => "mean_axis",
            Reduction::Window { .. } => "moving_mean",
        }
    }
}

/// How a worker reads one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LaneStrategy {
    /// Single-element lanes: the mean is the element itself.
    Copy,
    /// Unit-stride lanes, summed as slices.
    Contiguous { simd: bool },
    /// Runs of adjacent outputs swept lane-index first.
    RowSweep,
    /// One compensated strided walk per output.
    Strided,
}

impl LaneStrategy {
    fn select(map: &LaneMap, simd: bool) -> Self {
        if map.lane_len == 1 {
            LaneStrategy::Copy
        } else if map.lane_stride == 1 {
            LaneStrategy::Contiguous { simd }
        } else if map.prefers_row_sweep() {
            LaneStrategy::RowSweep
        } else {
            LaneStrategy::Strided
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LaneStrategy::Copy => "copy",
            LaneStrategy::Contiguous { simd: true } => "contiguous_simd",
            LaneStrategy::Contiguous { simd: false } => "contiguous",
            LaneStrategy::RowSweep => "row_sweep",
            LaneStrategy::Strided => "strided",
        }
    }
}

struct LaneOutcome<O> {
    values: Vec<O>,
    out_shape: Vec<usize>,
    partitions: usize,
    path: &'static str,
}

/// Computes the mean described by `reduction` and returns a new C-ordered
/// array. The input is only read.
///
/// Fails with [`ShapeError`] for a bad axis or window and for any mean over
/// zero elements, and with [`crate::MeanError::Allocation`] when the
/// output cannot be reserved.
pub fn compute_mean<T: MeanElement>(
    input: ArrayViewD<'_, T>,
    reduction: Reduction,
    ctx: &ExecutionContext,
) -> Result<ArrayD<T::Output>> {
    let start = Instant::now();
    let outcome = match reduction {
        Reduction::All { keepdims } => reduce_all(&input, keepdims, ctx)?,
        Reduction::Axis { axis, keepdims } => reduce_axis(&input, axis, keepdims, ctx)?,
        Reduction::Window { axis, size } => reduce_windows(&input, axis, size, ctx)?,
    };

    let event = KernelEvent {
        operation: reduction.operation(),
        dtype: T::DTYPE_NAME,
        path: outcome.path,
        elements: input.len(),
        outputs: outcome.values.len(),
        partitions: outcome.partitions,
        duration_ms: 0.0,
    }
    .with_duration(start.elapsed());
    debug!(
        operation = event.operation,
        dtype = event.dtype,
        path = event.path,
        elements = event.elements,
        outputs = event.outputs,
        partitions = event.partitions,
        duration_ms = event.duration_ms,
        "mean computed"
    );
    metrics::record(event);

    ArrayD::from_shape_vec(IxDyn(&outcome.out_shape), outcome.values)
        .map_err(|err| ShapeError::Layout(err.to_string()).into())
}

/// Mean along `axis`. With `keepdims` the axis stays with length 1.
pub fn mean_axis<T: MeanElement>(
    input: ArrayViewD<'_, T>,
    axis: isize,
    keepdims: bool,
    ctx: &ExecutionContext,
) -> Result<ArrayD<T::Output>> {
    compute_mean(input, Reduction::Axis { axis, keepdims }, ctx)
}

/// Mean over every element, as a 0-d array (or all-ones shape with
/// `keepdims`).
pub fn mean_all<T: MeanElement>(
    input: ArrayViewD<'_, T>,
    keepdims: bool,
    ctx: &ExecutionContext,
) -> Result<ArrayD<T::Output>> {
    compute_mean(input, Reduction::All { keepdims }, ctx)
}

/// Moving mean over valid windows of `window` elements along `axis`.
pub fn moving_mean<T: MeanElement>(
    input: ArrayViewD<'_, T>,
    window: usize,
    axis: isize,
    ctx: &ExecutionContext,
) -> Result<ArrayD<T::Output>> {
    compute_mean(input, Reduction::Window { axis, size: window }, ctx)
}

fn reduce_axis<T: MeanElement>(
    input: &ArrayViewD<'_, T>,
    axis: isize,
    keepdims: bool,
    ctx: &ExecutionContext,
) -> Result<LaneOutcome<T::Output>> {
    let axis = normalize_axis(axis, input.ndim())?;
    let map = LaneMap::along_axis(input.shape(), input.strides(), axis);
    if map.lane_len == 0 {
        return Err(ShapeError::EmptyReduction.into());
    }
    let mut outcome = lane_means(input, &map, ctx)?;
    if keepdims {
        outcome.out_shape.insert(axis, 1);
    }
    Ok(outcome)
}

fn reduce_windows<T: MeanElement>(
    input: &ArrayViewD<'_, T>,
    axis: isize,
    window: usize,
    ctx: &ExecutionContext,
) -> Result<LaneOutcome<T::Output>> {
    let axis = normalize_axis(axis, input.ndim())?;
    let len = input.shape()[axis];
    if len == 0 {
        return Err(ShapeError::EmptyReduction.into());
    }
    if window == 0 {
        return Err(ShapeError::ZeroWindow.into());
    }
    if window > len {
        return Err(ShapeError::WindowTooLarge { window, len, axis }.into());
    }
    let map = LaneMap::windows(input.shape(), input.strides(), axis, window);
    lane_means(input, &map, ctx)
}

fn reduce_all<T: MeanElement>(
    input: &ArrayViewD<'_, T>,
    keepdims: bool,
    ctx: &ExecutionContext,
) -> Result<LaneOutcome<T::Output>> {
    let count = checked_product(input.shape())?;
    if count == 0 {
        return Err(ShapeError::EmptyReduction.into());
    }
    let map = match innermost_axis(input.shape(), input.strides()) {
        Some(axis) => LaneMap::along_axis(input.shape(), input.strides(), axis),
        None => LaneMap {
            out_shape: Vec::new(),
            out_strides: Vec::new(),
            lane_len: 1,
            lane_stride: 1,
        },
    };
    let lanes = map.outputs()?;
    let strategy = match LaneStrategy::select(&map, ctx.config().simd) {
        LaneStrategy::RowSweep => LaneStrategy::Strided,
        other => other,
    };
    let parts = plan_for(&map, lanes, ctx);
    let mut partials = try_filled(parts.len(), KahanSum::default())?;
    let tasks: Vec<_> = parts.iter().copied().zip(partials.iter_mut()).collect();

    ctx.fork_join(tasks, |partition, partial: &mut KahanSum| {
        let base = input.as_ptr();
        let mut cursor = Cursor::at(&map, partition.start);
        for _ in partition.range() {
            // SAFETY: the cursor only visits positions inside the view and
            // each lane stays within the reduced axis.
            partial.add(unsafe { lane_sum::<T>(base, cursor.offset(), &map, strategy) });
            cursor.advance();
        }
        Ok(())
    })?;

    let mut total = KahanSum::default();
    for partial in &partials {
        total.add(partial.total());
    }
    let out_shape = if keepdims {
        vec![1; input.ndim()]
    } else {
        Vec::new()
    };
    Ok(LaneOutcome {
        values: vec![T::from_mean(total.total() / count as f64)],
        out_shape,
        partitions: parts.len(),
        path: strategy.label(),
    })
}

/// Axis of the smallest absolute stride among those longer than one.
fn innermost_axis(shape: &[usize], strides: &[isize]) -> Option<usize> {
    shape
        .iter()
        .zip(strides)
        .enumerate()
        .filter(|&(_, (&len, _))| len > 1)
        .min_by_key(|&(axis, (_, &stride))| (stride.unsigned_abs(), usize::MAX - axis))
        .map(|(axis, _)| axis)
        .or_else(|| shape.len().checked_sub(1))
}

fn plan_for(map: &LaneMap, units: usize, ctx: &ExecutionContext) -> Vec<Partition> {
    plan(PlanRequest {
        units,
        work_per_unit: map.lane_len,
        threads: ctx.threads(),
        parallel_min_elements: ctx.config().parallel_min_elements,
    })
}

/// Allocates the output, then fills it with one worker per partition.
fn lane_means<T: MeanElement>(
    input: &ArrayViewD<'_, T>,
    map: &LaneMap,
    ctx: &ExecutionContext,
) -> Result<LaneOutcome<T::Output>> {
    let outputs = map.outputs()?;
    let strategy = LaneStrategy::select(map, ctx.config().simd);
    let parts = plan_for(map, outputs, ctx);
    let mut values = try_filled(outputs, <T::Output as Zero>::zero())?;

    let mut tasks = Vec::with_capacity(parts.len());
    let mut rest = values.as_mut_slice();
    for partition in &parts {
        let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(partition.len());
        tasks.push((*partition, chunk));
        rest = tail;
    }

    ctx.fork_join(tasks, |partition, chunk: &mut [T::Output]| {
        fill_partition(input, map, strategy, partition, chunk)
    })?;

    Ok(LaneOutcome {
        values,
        out_shape: map.out_shape.clone(),
        partitions: parts.len(),
        path: strategy.label(),
    })
}

fn fill_partition<T: MeanElement>(
    input: &ArrayViewD<'_, T>,
    map: &LaneMap,
    strategy: LaneStrategy,
    partition: &Partition,
    out: &mut [T::Output],
) -> Result<()> {
    let base = input.as_ptr();
    let count = map.lane_len as f64;
    let mut cursor = Cursor::at(map, partition.start);

    if strategy == LaneStrategy::RowSweep {
        return sweep_rows::<T>(base, map, &mut cursor, count, out);
    }
    for slot in out.iter_mut() {
        // SAFETY: positions come from the view's own shape and strides.
        let sum = unsafe { lane_sum::<T>(base, cursor.offset(), map, strategy) };
        *slot = T::from_mean(sum / count);
        cursor.advance();
    }
    Ok(())
}

/// Sum of the lane starting `offset` elements from `base`.
///
/// # Safety
/// `offset` must be the start of a lane of `map` inside the view behind
/// `base`.
#[inline]
unsafe fn lane_sum<T: MeanElement>(
    base: *const T,
    offset: isize,
    map: &LaneMap,
    strategy: LaneStrategy,
) -> f64 {
    let start = base.offset(offset);
    match strategy {
        LaneStrategy::Copy => (*start).to_f64(),
        LaneStrategy::Contiguous { simd } => {
            let lane = slice::from_raw_parts(start, map.lane_len);
            if simd {
                T::simd_sum(lane)
            } else {
                T::scalar_sum(lane)
            }
        }
        LaneStrategy::RowSweep | LaneStrategy::Strided => {
            strided_sum(start, map.lane_len, map.lane_stride)
        }
    }
}

/// Fills `out` run by run, where a run is a block of outputs on one
/// innermost row. Each lane index is applied to the whole run before the
/// next, so reads follow the row in memory. Per output the additions happen
/// in lane order, exactly as in a strided walk.
fn sweep_rows<T: MeanElement>(
    base: *const T,
    map: &LaneMap,
    cursor: &mut Cursor<'_>,
    count: f64,
    out: &mut [T::Output],
) -> Result<()> {
    let step = map.inner().map_or(0, |(_, stride)| stride);
    let capacity = out.len().min(ROW_SWEEP_BLOCK);
    let mut sums = try_filled(capacity, 0.0f64)?;
    let mut comps = try_filled(capacity, 0.0f64)?;

    let mut done = 0usize;
    while done < out.len() {
        let run = cursor
            .remaining_in_row()
            .min(out.len() - done)
            .min(ROW_SWEEP_BLOCK);
        let (sums, comps) = (&mut sums[..run], &mut comps[..run]);
        sums.fill(0.0);
        comps.fill(0.0);

        let mut lane_ptr = base.wrapping_offset(cursor.offset());
        for _ in 0..map.lane_len {
            // SAFETY: `lane_ptr + k * step` for `k < run` addresses the
            // current lane element of each output in this run.
            unsafe { accumulate_run(sums, comps, lane_ptr, step) };
            lane_ptr = lane_ptr.wrapping_offset(map.lane_stride);
        }
        let slots = out[done..done + run].iter_mut();
        for ((slot, &sum), &comp) in slots.zip(sums.iter()).zip(comps.iter()) {
            *slot = T::from_mean((sum - comp) / count);
        }

        done += run;
        cursor.advance_in_row(run);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use ndarray::{arr2, Array, Axis};

    fn parallel_ctx(threads: usize) -> ExecutionContext {
        ExecutionContext::from_config(
            KernelConfig::default()
                .with_threads(threads)
                .with_parallel_min_elements(0),
        )
        .unwrap()
    }

    #[test]
    fn strategy_follows_layout() {
        let row_major = LaneMap::along_axis(&[4, 5], &[5, 1], 1);
        assert_eq!(
            LaneStrategy::select(&row_major, false),
            LaneStrategy::Contiguous { simd: false }
        );
        let columns = LaneMap::along_axis(&[4, 5], &[5, 1], 0);
        assert_eq!(LaneStrategy::select(&columns, true), LaneStrategy::RowSweep);
        let transposed = LaneMap::along_axis(&[4, 5], &[1, 4], 0);
        assert_eq!(
            LaneStrategy::select(&transposed, true),
            LaneStrategy::Contiguous { simd: true }
        );
        let transposed_rows = LaneMap::along_axis(&[4, 5], &[1, 4], 1);
        assert_eq!(
            LaneStrategy::select(&transposed_rows, true),
            LaneStrategy::RowSweep
        );
        let gather = LaneMap::along_axis(&[4, 5], &[10, 2], 1);
        assert_eq!(LaneStrategy::select(&gather, true), LaneStrategy::Strided);
        let single = LaneMap::along_axis(&[1, 5], &[5, 1], 0);
        assert_eq!(LaneStrategy::select(&single, true), LaneStrategy::Copy);
    }

    #[test]
    fn row_sweep_matches_strided_walk_exactly() {
        let data = Array::from_shape_fn((37, 1300), |(r, c)| ((r * 31 + c * 17) % 101) as f64 * 0.1);
        let view = data.view().into_dyn();
        let map = LaneMap::along_axis(view.shape(), view.strides(), 0);
        for partition in [
            Partition { index: 0, start: 0, end: 1300 },
            Partition { index: 1, start: 5, end: 1150 },
        ] {
            let mut swept = vec![0.0f64; partition.len()];
            let mut walked = vec![0.0f64; partition.len()];
            fill_partition(&view, &map, LaneStrategy::RowSweep, &partition, &mut swept).unwrap();
            fill_partition(&view, &map, LaneStrategy::Strided, &partition, &mut walked).unwrap();
            assert_eq!(swept, walked);
            let expected = data.column(partition.start).sum() / 37.0;
            assert!((walked[0] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn innermost_axis_prefers_unit_stride() {
        assert_eq!(innermost_axis(&[3, 4], &[4, 1]), Some(1));
        assert_eq!(innermost_axis(&[3, 4], &[1, 3]), Some(0));
        assert_eq!(innermost_axis(&[3, 1], &[1, 1]), Some(0));
        assert_eq!(innermost_axis(&[1, 1], &[1, 1]), Some(1));
        assert_eq!(innermost_axis(&[], &[]), None);
    }

    #[test]
    fn full_mean_of_zero_dimensional_array() {
        let scalar = ndarray::arr0(4.5f64).into_dyn();
        let ctx = parallel_ctx(2);
        let mean = mean_all(scalar.view(), false, &ctx).unwrap();
        assert_eq!(mean.ndim(), 0);
        assert_eq!(mean.iter().next().copied(), Some(4.5));
    }

    #[test]
    fn full_mean_splits_lanes_across_workers() {
        let data = Array::from_shape_fn((64, 8), |(r, c)| (r * 8 + c) as f64);
        let ctx = parallel_ctx(4);
        let mean = mean_all(data.view().into_dyn(), true, &ctx).unwrap();
        assert_eq!(mean.shape(), &[1, 1]);
        assert_eq!(mean.iter().next().copied(), Some(255.5));
    }

    #[test]
    fn zero_length_outer_dimension_yields_empty_output() {
        let data = Array::<f64, _>::zeros((0, 3));
        let ctx = parallel_ctx(2);
        let out = mean_axis(data.view().into_dyn(), 1, false, &ctx).unwrap();
        assert_eq!(out.shape(), &[0]);
    }

    #[test]
    fn windows_over_leading_axis() {
        let data = arr2(&[[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]]);
        let ctx = parallel_ctx(2);
        let out = moving_mean(data.view().into_dyn(), 2, 0, &ctx).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        let first: Vec<f32> = out.index_axis(Axis(1), 0).iter().copied().collect();
        let second: Vec<f32> = out.index_axis(Axis(1), 1).iter().copied().collect();
        assert_eq!(first, vec![1.5, 2.5, 3.5]);
        assert_eq!(second, vec![15.0, 25.0, 35.0]);
    }

    #[test]
    fn kernel_calls_are_recorded() {
        let data = arr2(&[[1i32, 2], [3, 4]]);
        let ctx = parallel_ctx(1);
        mean_axis(data.view().into_dyn(), 1, false, &ctx).unwrap();
        assert!(metrics::snapshot()
            .iter()
            .any(|u| u.operation == "mean_axis" && u.dtype == "int32"));
    }
}
