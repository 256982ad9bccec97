use crate::element::MeanElement;

#[inline]
pub(crate) fn kahan_step(sum: &mut f64, comp: &mut f64, value: f64) {
    let y = value - *comp;
    let t = *sum + y;
    *comp = (t - *sum) - y;
    *sum = t;
}

/// Kahan-compensated running sum.
#[derive(Clone, Copy, Debug, Default)]
pub struct KahanSum {
    sum: f64,
    comp: f64,
}

impl KahanSum {
    #[inline]
    pub fn add(&mut self, value: f64) {
        kahan_step(&mut self.sum, &mut self.comp, value);
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.sum - self.comp
    }
}

/// Sums `len` elements starting at `base`, `stride` elements apart.
///
/// # Safety
/// Every `base + i * stride` for `i < len` must address an initialised
/// element of the same allocation.
#[inline]
pub(crate) unsafe fn strided_sum<T: MeanElement>(base: *const T, len: usize, stride: isize) -> f64 {
    let mut acc = KahanSum::default();
    let mut ptr = base;
    for _ in 0..len {
        acc.add((*ptr).to_f64());
        ptr = ptr.wrapping_offset(stride);
    }
    acc.total()
}

/// Adds lane position `index` of a run of adjacent outputs into their
/// compensated accumulators.
///
/// # Safety
/// `base + k * step` must be a valid element for every `k < sums.len()`.
#[inline]
pub(crate) unsafe fn accumulate_run<T: MeanElement>(
    sums: &mut [f64],
    comps: &mut [f64],
    base: *const T,
    step: isize,
) {
    let mut ptr = base;
    for (sum, comp) in sums.iter_mut().zip(comps.iter_mut()) {
        kahan_step(sum, comp, (*ptr).to_f64());
        ptr = ptr.wrapping_offset(step);
    }
}
