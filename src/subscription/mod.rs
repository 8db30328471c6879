//! Long-lived subscription state machine with Fibonacci-backoff
//! auto-resubscribe, matching `SubscribeInteraction` in the original driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Notify, RwLock};

use crate::cache::DeviceDataCache;
use crate::error::Result;
use crate::transport::{
    AttributePath, EventPath, MatterTransport, SessionHandle, SubscriptionHandle,
    SubscriptionIntervalSecs, SubscriptionSink,
};

/// A subscribing driver may not hold more than this many concurrent
/// subscriptions to one device.
pub const MAX_SUBSCRIPTIONS: usize = 3;
pub const MAX_PATHS_PER_SUBSCRIBE: usize = 3;
pub const MAX_PATHS_PER_PUBLISHER: usize = 9;

/// Bounded 10m24s ceiling — intentionally shorter than the SDK's own
/// (much longer) default, so a recovering device is observed promptly.
pub const MAX_RETRY_WAIT_INTERVAL_MS: u64 = 624_000;
/// Per-step wait multiplier feeding the Fibonacci sequence.
const WAIT_TIME_MULTIPLIER_MS: u64 = 10_000;
/// Jitter floor as a percentage of the computed maximum wait.
const MIN_WAIT_TIME_INTERVAL_PERCENT: u64 = 30;

/// The `attempt`-th Fibonacci number, stopping the walk as soon as
/// multiplying it by `WAIT_TIME_MULTIPLIER_MS` would meet or exceed the
/// ceiling — growth past that point is moot since the caller clamps to the
/// ceiling anyway, and stopping early keeps this from overflowing for large
/// attempt counts.
fn fib_capped(attempt: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..attempt.max(1) {
        let next = a.saturating_add(b);
        a = b;
        b = next;
        if a.saturating_mul(WAIT_TIME_MULTIPLIER_MS) >= MAX_RETRY_WAIT_INTERVAL_MS {
            break;
        }
    }
    a
}

/// Deterministic resubscribe wait bound computation: returns
/// `(min_wait_ms, max_wait_ms)`; the actual wait is drawn uniformly from
/// this range.
pub fn resubscribe_wait_bounds(attempt: u32) -> (u64, u64) {
    let max_wait = fib_capped(attempt)
        .saturating_mul(WAIT_TIME_MULTIPLIER_MS)
        .min(MAX_RETRY_WAIT_INTERVAL_MS);
    let min_wait = (MIN_WAIT_TIME_INTERVAL_PERCENT * max_wait) / 100;
    (min_wait, max_wait)
}

fn jittered_wait(attempt: u32) -> std::time::Duration {
    let (min_wait, max_wait) = resubscribe_wait_bounds(attempt);
    let wait_ms = if max_wait > min_wait {
        min_wait + rand::thread_rng().gen_range(0..(max_wait - min_wait))
    } else {
        min_wait
    };
    std::time::Duration::from_millis(wait_ms)
}

/// Negotiate `{floor, ceiling}` against the comm-fail timeout: the ceiling
/// must land strictly below it, and the floor is narrowed to match if it
/// would otherwise exceed the (possibly tightened) ceiling.
pub fn negotiate_interval(
    desired: SubscriptionIntervalSecs,
    comm_fail_timeout_secs: u16,
) -> SubscriptionIntervalSecs {
    let ceiling = desired
        .max_interval_ceiling_secs
        .min(comm_fail_timeout_secs.saturating_sub(1));
    let floor = desired.min_interval_floor_secs.min(ceiling);
    SubscriptionIntervalSecs {
        min_interval_floor_secs: floor,
        max_interval_ceiling_secs: ceiling,
    }
}

/// One long-lived subscription to one device's attribute/event paths.
/// Implements `SubscriptionSink` itself so `MatterTransport::subscribe` can
/// drive it directly; forwards data into the shared cache and triggers
/// resubscribe on failure.
pub struct SubscribeInteraction {
    transport: Arc<dyn MatterTransport>,
    session: RwLock<SessionHandle>,
    paths: Vec<AttributePath>,
    events: Vec<EventPath>,
    interval: SubscriptionIntervalSecs,
    cache: DeviceDataCache,
    handle: RwLock<Option<Arc<dyn SubscriptionHandle>>>,
    attempts: AtomicU32,
    subscription_id: AtomicU32,
    established: Notify,
    established_once: AtomicU64,
    /// Lets the `SubscriptionSink` callbacks (which only ever see `&self`)
    /// schedule work that needs an owned `Arc<Self>`, the same
    /// weak-upgrade-in-constructor idiom used to wire handler state-change
    /// pushers back to their owning bridge.
    self_weak: std::sync::OnceLock<std::sync::Weak<Self>>,
}

impl SubscribeInteraction {
    pub fn new(
        transport: Arc<dyn MatterTransport>,
        session: SessionHandle,
        paths: Vec<AttributePath>,
        events: Vec<EventPath>,
        interval: SubscriptionIntervalSecs,
        cache: DeviceDataCache,
    ) -> Arc<Self> {
        let interaction = Arc::new(Self {
            transport,
            session: RwLock::new(session),
            paths,
            events,
            interval,
            cache,
            handle: RwLock::new(None),
            attempts: AtomicU32::new(0),
            subscription_id: AtomicU32::new(0),
            established: Notify::new(),
            established_once: AtomicU64::new(0),
            self_weak: std::sync::OnceLock::new(),
        });
        let _ = interaction.self_weak.set(Arc::downgrade(&interaction));
        interaction
    }

    /// Issue the initial subscribe request. Resolves once the first report
    /// cycle establishes, or the transport reports an immediate failure.
    pub async fn send(self: &Arc<Self>) -> Result<()> {
        let session = self.session.read().await.clone();
        let sink: Arc<dyn SubscriptionSink> = self.clone();
        let handle = self
            .transport
            .subscribe(&session, &self.paths, &self.events, self.interval, sink)
            .await?;
        *self.handle.write().await = Some(handle);
        Ok(())
    }

    /// Blocks until `on_subscription_established` fires at least once.
    pub async fn wait_established(&self) {
        if self.established_once.load(Ordering::SeqCst) == 0 {
            self.established.notified().await;
        }
    }

    async fn resubscribe(self: Arc<Self>, reason: String) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let wait = jittered_wait(attempt);
        log::warn!(
            "subscription needs resubscribe (attempt {attempt}): {reason}; waiting {wait:?}"
        );
        tokio::time::sleep(wait).await;

        if let Err(e) = self.send().await {
            log::error!("resubscribe attempt {attempt} failed to even start: {e}");
        }
    }

    pub async fn cancel(&self) {
        if let Some(handle) = self.handle.write().await.take() {
            handle.cancel().await;
        }
    }
}

#[async_trait]
impl SubscriptionSink for SubscribeInteraction {
    async fn on_subscription_established(&self, subscription_id: u32) {
        self.subscription_id.store(subscription_id, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        if self.established_once.swap(1, Ordering::SeqCst) == 0 {
            self.established.notify_waiters();
        }
    }

    async fn on_attribute_changed(&self, path: AttributePath, tlv: Vec<u8>) {
        self.cache.set_attribute(path, tlv);
    }

    async fn on_event(&self, _path: EventPath, _tlv: Vec<u8>) {
        // Event fan-out to resource updates is driven by MatterDevice's own
        // event-read mapper lookup; this hook exists so a future event
        // store could be layered here without touching the transport
        // boundary.
    }

    async fn on_resubscription_needed(&self, reason: String) {
        let Some(interaction) = self.self_weak.get().and_then(std::sync::Weak::upgrade) else {
            log::error!("subscription resubscribe-needed after teardown: {reason}");
            return;
        };
        tokio::spawn(interaction.resubscribe(reason));
    }

    async fn on_done(&self) {
        log::error!("subscription read client terminated; surfacing as device offline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_bounds_respect_ceiling_and_jitter_floor() {
        let (min_wait, max_wait) = resubscribe_wait_bounds(20);
        assert_eq!(max_wait, MAX_RETRY_WAIT_INTERVAL_MS);
        assert_eq!(min_wait, MAX_RETRY_WAIT_INTERVAL_MS * 30 / 100);
        assert!(min_wait <= max_wait);
    }

    #[test]
    fn wait_bounds_grow_with_attempts_until_capped() {
        let (_, early) = resubscribe_wait_bounds(1);
        let (_, later) = resubscribe_wait_bounds(5);
        assert!(later >= early);
        assert!(later <= MAX_RETRY_WAIT_INTERVAL_MS);
    }

    #[test]
    fn negotiate_interval_keeps_ceiling_below_comm_fail_timeout() {
        let desired = SubscriptionIntervalSecs {
            min_interval_floor_secs: 300,
            max_interval_ceiling_secs: 7200,
        };
        let negotiated = negotiate_interval(desired, 3600);
        assert!(negotiated.max_interval_ceiling_secs < 3600);
        assert!(negotiated.min_interval_floor_secs <= negotiated.max_interval_ceiling_secs);
    }

    #[test]
    fn negotiate_interval_narrows_floor_to_match_tightened_ceiling() {
        let desired = SubscriptionIntervalSecs {
            min_interval_floor_secs: 5000,
            max_interval_ceiling_secs: 7200,
        };
        let negotiated = negotiate_interval(desired, 3600);
        assert_eq!(negotiated.min_interval_floor_secs, negotiated.max_interval_ceiling_secs);
    }
}
