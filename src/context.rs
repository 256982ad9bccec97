//! Execution contexts and the fork-join driver.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tracing::{debug, trace, warn};

use crate::config::KernelConfig;
use crate::error::{MeanError, Result};
use crate::reduce::partition::Partition;

/// A reference-counted worker pool plus the tuning it was built with.
///
/// Clones share the pool. The process-wide context from
/// [`ExecutionContext::global`] lives until exit; dedicated contexts tear
/// their threads down when the last clone is dropped.
#[derive(Clone)]
pub struct ExecutionContext {
    pool: Arc<rayon::ThreadPool>,
    config: KernelConfig,
}

static GLOBAL: OnceLock<Result<ExecutionContext>> = OnceLock::new();

impl ExecutionContext {
    /// Shared context configured from `MEAN3_*` environment variables,
    /// built on first use.
    pub fn global() -> Result<Self> {
        GLOBAL
            .get_or_init(|| {
                let config = KernelConfig::from_env();
                Self::from_config(config).or_else(|err| {
                    warn!(error = %err, "falling back to a single-threaded pool");
                    Self::from_config(config.with_threads(1))
                })
            })
            .clone()
    }

    pub fn from_config(config: KernelConfig) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("mean3-worker-{index}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| MeanError::ThreadPool(err.to_string()))?;
        debug!(threads = pool.current_num_threads(), "built worker pool");
        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    /// Dedicated context with exactly `threads` workers and default tuning.
    pub fn with_threads(threads: usize) -> Result<Self> {
        Self::from_config(KernelConfig::default().with_threads(threads))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Runs one task per partition and waits for all of them.
    ///
    /// A single task runs on the calling thread. Failures, panics included,
    /// are collected per partition; once every worker has finished the
    /// first failure in partition order is returned.
    pub(crate) fn fork_join<S, F>(&self, tasks: Vec<(Partition, S)>, work: F) -> Result<()>
    where
        S: Send,
        F: Fn(&Partition, S) -> Result<()> + Sync,
    {
        let run = |partition: &Partition, state: S| -> Result<()> {
            catch_unwind(AssertUnwindSafe(|| work(partition, state))).unwrap_or_else(|payload| {
                Err(MeanError::Worker {
                    partition: partition.index,
                    reason: panic_message(payload.as_ref()),
                })
            })
        };

        if tasks.len() <= 1 {
            return tasks
                .into_iter()
                .try_for_each(|(partition, state)| run(&partition, state));
        }

        let mut outcomes: Vec<Result<()>> = tasks.iter().map(|_| Ok(())).collect();
        let run = &run;
        self.pool.scope(|scope| {
            for ((partition, state), outcome) in tasks.into_iter().zip(outcomes.iter_mut()) {
                scope.spawn(move |_| {
                    trace!(
                        partition = partition.index,
                        start = partition.start,
                        end = partition.end,
                        "worker started"
                    );
                    *outcome = run(&partition, state);
                });
            }
        });
        outcomes.into_iter().collect()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("threads", &self.threads())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
