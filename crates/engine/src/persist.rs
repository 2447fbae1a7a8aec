//! Fire-and-forget run persistence.
//!
//! The run engine finishes a response before its record hits disk: finished
//! runs go into a bounded queue drained by one writer task. A full queue
//! drops the record with a log line and a counter bump instead of stalling
//! or failing the already-delivered response; the counters feed the health
//! report.

use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use store::{Run, RunStore};
use tokio::sync::mpsc;

#[derive(Clone)]
pub(crate) struct PersistQueue {
    tx: mpsc::Sender<Run>,
    pending: Arc<AtomicI64>,
    dropped: Arc<AtomicU64>,
    write_failures: Arc<AtomicU64>,
}

impl PersistQueue {
    pub(crate) fn new(store: RunStore, depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Run>(depth.max(1));
        let pending = Arc::new(AtomicI64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let write_failures = Arc::new(AtomicU64::new(0));

        let writer_pending = Arc::clone(&pending);
        let writer_failures = Arc::clone(&write_failures);

        tokio::spawn(async move {
            while let Some(run) = rx.recv().await {
                let run_id = run.id.clone();
                if let Err(e) = store.append_run(run).await {
                    writer_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("failed to persist run {run_id}: {e}");
                }
                writer_pending.fetch_sub(1, Ordering::Relaxed);
            }
        });

        Self {
            tx,
            pending,
            dropped,
            write_failures,
        }
    }

    pub(crate) fn enqueue(&self, run: Run) {
        match self.tx.try_send(run) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(run)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("persistence queue full, dropping run {}", run.id);
            }
            Err(mpsc::error::TrySendError::Closed(run)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("persistence writer is gone, dropping run {}", run.id);
            }
        }
    }

    pub(crate) fn pending(&self) -> i64 {
        self.pending.load(Ordering::Relaxed).max(0)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}
