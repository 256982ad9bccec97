use std::ops::Range;

/// A contiguous slice of the reduction domain owned by one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Inputs to the static partition planner.
#[derive(Clone, Copy, Debug)]
pub struct PlanRequest {
    /// Independent units of work (outputs, or lanes for a full reduction).
    pub units: usize,
    /// Input elements read per unit.
    pub work_per_unit: usize,
    pub threads: usize,
    pub parallel_min_elements: usize,
}

/// Splits `units` into at most `threads` balanced contiguous partitions.
///
/// Partition sizes differ by at most one, no partition is empty, and the
/// partitions cover `0..units` in order. Work below
/// `parallel_min_elements` stays in a single partition.
pub fn plan(request: PlanRequest) -> Vec<Partition> {
    let PlanRequest {
        units,
        work_per_unit,
        threads,
        parallel_min_elements,
    } = request;
    if units == 0 {
        return Vec::new();
    }
    let total_work = units.saturating_mul(work_per_unit.max(1));
    let count = if total_work < parallel_min_elements {
        1
    } else {
        threads.max(1).min(units)
    };

    let base = units / count;
    let extra = units % count;
    let mut partitions = Vec::with_capacity(count);
    let mut start = 0usize;
    for index in 0..count {
        let len = base + usize::from(index < extra);
        partitions.push(Partition {
            index,
            start,
            end: start + len,
        });
        start += len;
    }
    partitions
}
