use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    clock::SharedClock,
    config::PresenceConfig,
    services::outbox::{Outbox, WriteOp},
    state::store::SharedStore,
};

/// Everything the presence loops need for one membership.
#[derive(Clone)]
pub struct PresenceContext {
    /// Store receiving local heartbeats and evictions.
    pub store: SharedStore,
    /// Writer publishing heartbeats.
    pub outbox: Outbox,
    /// Identity being kept alive.
    pub user_id: String,
    /// Timer intervals.
    pub config: PresenceConfig,
    /// Source of heartbeat timestamps.
    pub clock: SharedClock,
}

/// Heartbeat and eviction timers for one membership.
///
/// `stop` cancels both loops exactly once; stopping an already stopped tracker is a no-op.
/// Dropping the tracker cancels the loops too.
pub struct PresenceTracker {
    token: CancellationToken,
    stopped: AtomicBool,
}

impl PresenceTracker {
    /// Publish a heartbeat now and then every heartbeat interval, and sweep stale
    /// participants every cleanup interval.
    pub fn start(context: PresenceContext) -> Self {
        let token = CancellationToken::new();
        tokio::spawn(heartbeat_loop(context.clone(), token.clone()));
        tokio::spawn(cleanup_loop(context.clone(), token.clone()));
        info!(
            room_id = %context.store.room_id(),
            user_id = %context.user_id,
            "presence started"
        );

        Self {
            token,
            stopped: AtomicBool::new(false),
        }
    }

    /// Cancel both timers. Returns `true` only for the call that actually stopped them.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        debug!("presence stopped");
        true
    }

    /// Whether the timers are running.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn heartbeat_loop(context: PresenceContext, token: CancellationToken) {
    let mut ticker = interval(context.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let now = context.clock.now_ms();
                context.store.touch(&context.user_id, now);
                // Failures are logged by the outbox and retried on the next tick.
                context.outbox.send(WriteOp::heartbeat(context.user_id.clone(), now));
            }
        }
    }
}

async fn cleanup_loop(context: PresenceContext, token: CancellationToken) {
    let period = context.config.cleanup_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                context.store.sweep_stale();
            }
        }
    }
}
