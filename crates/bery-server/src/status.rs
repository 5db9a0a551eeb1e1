//! Deferred delivery of relay-generated envelopes.
//!
//! Scheduled tasks capture only the target connection id and look it up
//! again when the timer fires. A connection that closed in the meantime
//! simply never sees the envelope: nothing is queued or retried.

use std::time::Duration;

use tracing::trace;

use bery_shared::{ConnectionId, Envelope};

use crate::registry::SharedRegistry;

#[derive(Clone)]
pub struct StatusEmitter {
    registry: SharedRegistry,
}

impl StatusEmitter {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Fire-and-forget: deliver `envelope` to `target` after `delay`.
    pub fn schedule(&self, target: ConnectionId, envelope: Envelope, delay: Duration) {
        self.schedule_with(target, delay, move || envelope);
    }

    /// Like [`schedule`](Self::schedule), but the envelope is built when the
    /// timer fires, so ids and timestamps reflect the send time.
    pub fn schedule_with<F>(&self, target: ConnectionId, delay: Duration, build: F)
    where
        F: FnOnce() -> Envelope + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let envelope = build();
            let kind = envelope.kind();
            if !registry.read().send(&target, envelope) {
                trace!(conn = %target, kind, "Scheduled envelope dropped, connection gone");
            }
        });
    }
}
