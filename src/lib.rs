//! Parallel strided mean kernels over n-dimensional arrays.
//!
//! Every reduction (axis mean, full mean, moving mean) is expressed as one
//! strided lane per output element. Outputs are split into balanced static
//! partitions and computed on a shared rayon pool; lane sums run in `f64`
//! with Kahan compensation, or with SIMD accumulators on contiguous lanes.
//!
//! With the `python` feature (on by default) the crate also builds the
//! `mean3` extension module for NumPy arrays.

mod config;
mod context;
mod element;
mod error;
pub mod metrics;
mod reduce;

#[cfg(feature = "python")]
mod python;

pub use config::{KernelConfig, PARALLEL_MIN_ELEMENTS};
pub use context::ExecutionContext;
pub use element::MeanElement;
pub use error::{MeanError, Result, ShapeError};
pub use reduce::layout::LaneMap;
pub use reduce::partition::{plan, Partition, PlanRequest};
pub use reduce::{compute_mean, mean_all, mean_axis, moving_mean, Reduction};

#[cfg(feature = "python")]
pub use python::init_test_module;
