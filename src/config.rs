use std::env;

/// Element count below which a call runs as a single partition.
pub const PARALLEL_MIN_ELEMENTS: usize = 1 << 15;

const THREADS_VAR: &str = "MEAN3_THREADS";
const PARALLEL_MIN_VAR: &str = "MEAN3_PARALLEL_MIN_ELEMENTS";
const SIMD_VAR: &str = "MEAN3_SIMD";

/// Tuning knobs for an [`ExecutionContext`](crate::ExecutionContext).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Worker threads in the pool. `None` lets rayon pick one per core.
    pub threads: Option<usize>,
    /// Minimum number of input elements touched before work is split
    /// across more than one partition.
    pub parallel_min_elements: usize,
    /// Use `wide` vector accumulators for contiguous floating-point lanes.
    pub simd: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            threads: None,
            parallel_min_elements: PARALLEL_MIN_ELEMENTS,
            simd: simd_supported(),
        }
    }
}

impl KernelConfig {
    /// Reads `MEAN3_THREADS`, `MEAN3_PARALLEL_MIN_ELEMENTS` and `MEAN3_SIMD`,
    /// keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(threads) = lookup(THREADS_VAR)
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&threads| threads > 0)
        {
            config.threads = Some(threads);
        }
        if let Some(min) = lookup(PARALLEL_MIN_VAR).and_then(|value| value.trim().parse().ok()) {
            config.parallel_min_elements = min;
        }
        if let Some(flag) = lookup(SIMD_VAR) {
            match flag.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "off" => config.simd = false,
                "1" | "true" | "on" => config.simd = simd_supported(),
                _ => {}
            }
        }
        config
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    pub fn with_parallel_min_elements(mut self, elements: usize) -> Self {
        self.parallel_min_elements = elements;
        self
    }

    pub fn with_simd(mut self, enabled: bool) -> Self {
        self.simd = enabled && simd_supported();
        self
    }
}

fn simd_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("sse2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        true
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}
