//! Unit of work: the transaction boundary that flushes the audit trail
//!
//! Every mutating service call runs inside exactly one unit of work. Commit
//! drains the shared [`AuditTrail`] into the configured [`AuditSink`] — the
//! only place pending audit entries ever leave the trail. A scope that ends
//! without committing (an error path) discards its pending entries on drop,
//! so no entry can leak into a later commit.

use std::sync::Arc;

use tracing::warn;

use crate::core::audit::{AuditSink, AuditTrail};
use crate::core::error::Result;

/// A single logical transaction scope.
///
/// `commit` consumes the scope; dropping without commit releases it and
/// discards whatever was queued, on every exit path.
pub struct UnitOfWork {
    trail: Arc<AuditTrail>,
    sink: Arc<dyn AuditSink>,
    committed: bool,
}

impl UnitOfWork {
    pub fn begin(trail: Arc<AuditTrail>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            trail,
            sink,
            committed: false,
        }
    }

    /// Flush pending audit entries into the sink. Called exactly once per
    /// scope; store failures from the sink propagate unchanged.
    pub async fn commit(mut self) -> Result<()> {
        self.committed = true;
        let entries = self.trail.drain();
        if entries.is_empty() {
            return Ok(());
        }
        self.sink.write(entries).await
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.committed {
            let discarded = self.trail.drain();
            if !discarded.is_empty() {
                warn!(
                    count = discarded.len(),
                    "unit of work dropped without commit; discarding pending audit entries"
                );
            }
        }
    }
}
