use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant, sleep};

use crate::api::{DataSource, EndpointKey};
use crate::command::{Command, QueryOutcome};
use crate::error::FetchError;

#[derive(Clone, Debug, PartialEq)]
pub enum QueryState {
    Idle,
    /// A request is in flight. A refetch of a settled key carries the last
    /// successful payload so it stays drawable until the new one lands.
    Loading(Option<Arc<Value>>),
    Success(Arc<Value>),
    Error(FetchError),
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading(_))
    }

    pub fn data(&self) -> Option<&Arc<Value>> {
        match self {
            QueryState::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Fresh data, or the previous payload while a refetch is pending.
    pub fn last_data(&self) -> Option<&Arc<Value>> {
        match self {
            QueryState::Success(value) | QueryState::Loading(Some(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            QueryState::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Live view of one key's state. Dropping it unsubscribes.
pub type Subscription = watch::Receiver<QueryState>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryBackoff {
    Immediate,
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl RetryBackoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryBackoff::Immediate => Duration::ZERO,
            RetryBackoff::Fixed(delay) => *delay,
            RetryBackoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt);
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefetchPolicy {
    pub refetch_on_focus: bool,
    pub max_retries: u32,
    pub retry_backoff: RetryBackoff,
    /// Fraction of each backoff delay that is randomly added or removed.
    pub retry_jitter: f64,
    pub stale_after: Option<Duration>,
    pub refetch_interval: Option<Duration>,
}

impl Default for RefetchPolicy {
    fn default() -> Self {
        RefetchPolicy {
            refetch_on_focus: false,
            max_retries: 1,
            retry_backoff: RetryBackoff::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(8),
            },
            retry_jitter: 0.0,
            stale_after: None,
            refetch_interval: None,
        }
    }
}

impl RefetchPolicy {
    fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.retry_backoff.delay_for_attempt(attempt);
        if self.retry_jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.retry_jitter;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

struct Entry {
    tx: watch::Sender<QueryState>,
    generation: u64,
    in_flight: Option<AbortHandle>,
    settled_at: Option<Instant>,
    invalidated: bool,
}

impl Entry {
    fn new() -> Self {
        let (tx, _) = watch::channel(QueryState::Idle);
        Entry {
            tx,
            generation: 0,
            in_flight: None,
            settled_at: None,
            invalidated: false,
        }
    }

    fn subscribed(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    fn is_loading(&self) -> bool {
        self.tx.borrow().is_loading()
    }

    fn has_succeeded(&self) -> bool {
        matches!(&*self.tx.borrow(), QueryState::Success(_))
    }

    fn needs_fetch(&self, policy: &RefetchPolicy, now: Instant) -> bool {
        match &*self.tx.borrow() {
            QueryState::Idle => true,
            QueryState::Loading(_) => false,
            QueryState::Error(_) => self.invalidated,
            QueryState::Success(_) => {
                if self.invalidated {
                    return true;
                }
                match (policy.stale_after, self.settled_at) {
                    (Some(stale_after), Some(settled_at)) => {
                        now.saturating_duration_since(settled_at) >= stale_after
                    }
                    _ => false,
                }
            }
        }
    }
}

/// Keyed request cache owned by the event loop.
///
/// Fetches run as tokio tasks and report back as [`Command::QueryResolved`];
/// the loop hands each outcome to [`QueryCache::apply`]. Every request carries
/// the generation its key had when it was issued, so only the most recently
/// issued request for a key can settle that key, and only while somebody is
/// still subscribed to it.
pub struct QueryCache {
    source: Arc<dyn DataSource>,
    policy: RefetchPolicy,
    entries: HashMap<EndpointKey, Entry>,
    events: mpsc::UnboundedSender<Command>,
    next_generation: u64,
}

impl QueryCache {
    pub fn new(
        source: Arc<dyn DataSource>,
        policy: RefetchPolicy,
        events: mpsc::UnboundedSender<Command>,
    ) -> Self {
        QueryCache {
            source,
            policy,
            entries: HashMap::new(),
            events,
            next_generation: 0,
        }
    }

    pub fn policy(&self) -> &RefetchPolicy {
        &self.policy
    }

    pub fn subscribe(&mut self, key: &EndpointKey) -> Subscription {
        let now = Instant::now();
        let entry = self.entries.entry(key.clone()).or_insert_with(Entry::new);
        let rx = entry.tx.subscribe();
        if entry.needs_fetch(&self.policy, now) {
            self.start_fetch(key);
        }
        rx
    }

    #[cfg(test)]
    pub fn state(&self, key: &EndpointKey) -> QueryState {
        self.entries
            .get(key)
            .map(|entry| entry.tx.borrow().clone())
            .unwrap_or(QueryState::Idle)
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, key: &EndpointKey) -> usize {
        self.entries
            .get(key)
            .map(|entry| entry.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Subscribed keys refetch now; unsubscribed keys refetch on their next subscribe.
    pub fn invalidate(&mut self, key: &EndpointKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.subscribed() {
            self.start_fetch(key);
        } else {
            entry.invalidated = true;
        }
    }

    pub fn invalidate_all(&mut self) {
        let keys: Vec<EndpointKey> = self.entries.keys().cloned().collect();
        for key in &keys {
            self.invalidate(key);
        }
    }

    /// Terminal focus regained. Refetches subscribed keys that settled
    /// successfully; failed keys wait for an explicit invalidate. Returns how
    /// many keys were refetched.
    pub fn on_focus(&mut self) -> usize {
        if !self.policy.refetch_on_focus {
            return 0;
        }
        let keys: Vec<EndpointKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.subscribed() && entry.has_succeeded())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.start_fetch(key);
        }
        keys.len()
    }

    /// Polls subscribed, successfully settled keys older than the refetch interval.
    pub fn tick(&mut self, now: Instant) -> usize {
        let Some(interval) = self.policy.refetch_interval else {
            return 0;
        };
        let keys: Vec<EndpointKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.subscribed()
                    && entry.has_succeeded()
                    && entry
                        .settled_at
                        .map(|at| now.saturating_duration_since(at) >= interval)
                        .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.start_fetch(key);
        }
        keys.len()
    }

    /// Abandons requests nobody is waiting for any more. Returns how many were dropped.
    pub fn release_unsubscribed(&mut self) -> usize {
        let mut released = 0;
        for entry in self.entries.values_mut() {
            if entry.subscribed() || !entry.is_loading() {
                continue;
            }
            if let Some(handle) = entry.in_flight.take() {
                handle.abort();
            }
            entry.tx.send_replace(QueryState::Idle);
            released += 1;
        }
        released
    }

    /// Settles a key with a finished request. Returns true when a subscriber-visible
    /// state changed.
    pub fn apply(&mut self, outcome: QueryOutcome) -> bool {
        let Some(entry) = self.entries.get_mut(&outcome.key) else {
            return false;
        };
        if outcome.generation != entry.generation || !entry.is_loading() {
            return false;
        }
        entry.in_flight = None;
        if !entry.subscribed() {
            entry.tx.send_replace(QueryState::Idle);
            return false;
        }
        let state = match outcome.result {
            Ok(value) => QueryState::Success(Arc::new(value)),
            Err(err) => QueryState::Error(err),
        };
        entry.settled_at = Some(Instant::now());
        entry.tx.send_replace(state);
        true
    }

    fn start_fetch(&mut self, key: &EndpointKey) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(previous) = entry.in_flight.take() {
            previous.abort();
        }
        entry.generation = generation;
        entry.invalidated = false;
        let previous = entry.tx.borrow().data().cloned();
        entry.tx.send_replace(QueryState::Loading(previous));

        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let policy = self.policy;
        let key = key.clone();
        let handle = tokio::spawn(async move {
            let result = fetch_with_retry(source.as_ref(), &key, &policy).await;
            let _ = events.send(Command::QueryResolved(QueryOutcome {
                key,
                generation,
                result,
            }));
        });
        entry.in_flight = Some(handle.abort_handle());
    }
}

async fn fetch_with_retry(
    source: &dyn DataSource,
    key: &EndpointKey,
    policy: &RefetchPolicy,
) -> Result<Value, FetchError> {
    let mut attempt = 0;
    loop {
        match source.fetch(key).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.retry_delay(attempt);
                attempt += 1;
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
