//! Side channels written while a graph runs: heartbeat, phase timings,
//! execution steps and feature lifecycle.
//!
//! None of these may slow down or fail a run. Writes are queued onto a
//! single background writer running on the blocking pool, failures are
//! logged at `warn` and dropped, and [`RunContext::drain`] waits for the
//! queue to empty before the worker exits.

mod heartbeat;
mod steps;
mod timing;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::feature::{FeatureRepository, Lifecycle};
use crate::run::RunRepository;

pub use heartbeat::Heartbeat;
pub use steps::{
    ExecutionStep, ExecutionStepMonitor, ExecutionStepStore, SqliteExecutionStepStore, StepEvent,
};
pub use timing::{
    PhaseTimer, PhaseTiming, PhaseTimingRecorder, PhaseTimingStore, SqlitePhaseTimingStore,
};

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() -> Result<()> + Send>;

struct WriterInner {
    tx: Mutex<Option<mpsc::UnboundedSender<(&'static str, Job)>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Ordered fire-and-forget queue shared by every side channel of one run.
#[derive(Clone)]
pub(crate) struct Writer {
    inner: Arc<WriterInner>,
}

impl Writer {
    /// Start the background writer. Must be called inside a tokio runtime.
    fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(&'static str, Job)>();
        let task = tokio::task::spawn_blocking(move || {
            while let Some((what, job)) = rx.blocking_recv() {
                if let Err(e) = job() {
                    warn!(write = what, error = %e, "side-channel write failed");
                }
            }
        });
        Self {
            inner: Arc::new(WriterInner {
                tx: Mutex::new(Some(tx)),
                task: Mutex::new(Some(task)),
            }),
        }
    }

    fn disabled() -> Self {
        Self {
            inner: Arc::new(WriterInner {
                tx: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn submit(
        &self,
        what: &'static str,
        job: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        let Ok(guard) = self.inner.tx.lock() else {
            return;
        };
        match guard.as_ref() {
            Some(tx) => {
                if tx.send((what, Box::new(job))).is_err() {
                    debug!(write = what, "writer closed; dropping write");
                }
            }
            None => debug!(write = what, "no writer; dropping write"),
        }
    }

    async fn drain(&self) {
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
        let task = self.inner.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "side-channel writer panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Stores the side channels write to. Every sink is optional.
#[derive(Default, Clone)]
pub struct Sinks {
    pub runs: Option<Arc<dyn RunRepository>>,
    pub features: Option<Arc<dyn FeatureRepository>>,
    pub timings: Option<Arc<dyn PhaseTimingStore>>,
    pub steps: Option<Arc<dyn ExecutionStepStore>>,
}

/// Per-run observability handle passed explicitly to the graph.
pub struct RunContext {
    run_id: Option<String>,
    writer: Writer,
    features: Option<Arc<dyn FeatureRepository>>,
    pub heartbeat: Heartbeat,
    pub timings: PhaseTimingRecorder,
    pub steps: ExecutionStepMonitor,
}

impl RunContext {
    /// Context bound to `run_id`. Must be called inside a tokio runtime.
    pub fn new(run_id: impl Into<String>, sinks: Sinks) -> Self {
        let run_id = run_id.into();
        let writer = Writer::spawn();
        Self {
            heartbeat: Heartbeat::new(&run_id, sinks.runs, writer.clone()),
            timings: PhaseTimingRecorder::new(&run_id, sinks.timings, writer.clone()),
            steps: ExecutionStepMonitor::new(&run_id, sinks.steps, writer.clone()),
            features: sinks.features,
            run_id: Some(run_id),
            writer,
        }
    }

    /// A context that records nothing.
    pub fn detached() -> Self {
        let writer = Writer::disabled();
        Self {
            heartbeat: Heartbeat::new("", None, writer.clone()),
            timings: PhaseTimingRecorder::new("", None, writer.clone()),
            steps: ExecutionStepMonitor::new("", None, writer.clone()),
            features: None,
            run_id: None,
            writer,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Best-effort feature lifecycle update.
    pub fn record_lifecycle(&self, feature_id: &str, lifecycle: Lifecycle) {
        let Some(features) = self.features.clone() else {
            return;
        };
        let feature_id = feature_id.to_string();
        self.writer.submit("feature_lifecycle", move || {
            features.set_lifecycle(&feature_id, lifecycle)
        });
    }

    /// Wait for every queued write. Later writes are dropped.
    pub async fn drain(&self) {
        self.writer.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::error::ShepError;
    use crate::feature::SqliteFeatureRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn writes_run_in_order_and_drain_waits() {
        let writer = Writer::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            writer.submit("test", move || {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }
        writer.drain().await;
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let writer = Writer::spawn();
        let ran = Arc::new(AtomicUsize::new(0));
        writer.submit("fails", || Err(ShepError::Store("disk full".into())));
        let r = Arc::clone(&ran);
        writer.submit("after", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        writer.drain().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn writes_after_drain_are_dropped() {
        let writer = Writer::spawn();
        writer.drain().await;
        writer.submit("late", || panic!("must not run"));
        writer.drain().await;
    }

    #[tokio::test]
    async fn detached_context_is_inert() {
        let ctx = RunContext::detached();
        ctx.heartbeat.report_node_start(crate::workflow::Node::Analyze);
        ctx.record_lifecycle("f", Lifecycle::Analyze);
        ctx.drain().await;
        assert!(ctx.run_id().is_none());
    }

    #[tokio::test]
    async fn lifecycle_is_recorded() {
        let db = Db::open_in_memory().unwrap();
        let features = Arc::new(SqliteFeatureRepository::new(db.clone()));
        let ctx = RunContext::new(
            "run-1",
            Sinks {
                features: Some(features.clone()),
                ..Default::default()
            },
        );
        ctx.record_lifecycle("auth", Lifecycle::Research);
        ctx.drain().await;
        assert_eq!(
            features.get("auth").unwrap().unwrap().lifecycle,
            Lifecycle::Research
        );
    }
}
