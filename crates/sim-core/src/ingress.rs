//! Shared ingress-channel depth counter.
//!
//! The arbiter owns the only [`tokio::sync::mpsc::Receiver`] for the ingress channel, so nothing
//! else can call `Receiver::len`. Workers still need that number for the waiting-requests metric
//! (§4.6 step 2), so intake and the arbiter both poke this counter instead: intake bumps it right
//! before a successful send, the arbiter drops it right after a successful recv. It is therefore
//! the channel's depth at the last observed transition, not a live read of the channel itself —
//! fine, since metrics need only eventual consistency (§4.3).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct IngressDepth(Arc<AtomicI64>);

impl IngressDepth {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(0)))
    }

    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
