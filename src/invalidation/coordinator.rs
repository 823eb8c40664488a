//! Debounced, priority-aware invalidation coordinator.
//!
//! Events are queued and coalesced into batches. Low-priority events wait for a
//! quiet period; high-priority events process the whole queue at once. Only one
//! batch runs at a time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use metrics::{gauge, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{KeyPattern, PageCache};
use crate::domain::page::PageBundle;
use crate::util::lock::{mutex_lock, rw_read, rw_write};

use super::config::CoordinatorConfig;
use super::error::InvalidationError;
use super::events::{EventKind, EventQueue, EventType};
use super::impact::CategoryImpactMap;
use super::planner::{EventGroup, InvalidationPlan};
use super::rules::{InvalidationRule, RuleScope, RuleSet};

const SOURCE: &str = "invalidation::coordinator";

pub(crate) const METRIC_INVALIDATION_BATCH_MS: &str = "programmatic_invalidation_batch_ms";
pub(crate) const METRIC_INVALIDATION_QUEUE_LEN: &str = "programmatic_invalidation_queue_len";

/// Outcome of one processed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
    pub event_count: usize,
    pub group_count: usize,
    /// Events dropped because no rule covers their type.
    pub discarded: usize,
    /// Cache entries removed.
    pub invalidated: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    /// A debounce timer is armed.
    Pending,
    Processing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub queue_length: usize,
    pub is_processing: bool,
    pub rules_count: usize,
    pub last_processed_state: SchedulerPhase,
    pub batches_processed: u64,
    pub last_batch: Option<BatchReport>,
}

enum SchedulerState {
    Idle,
    Scheduled {
        deadline: Instant,
        generation: u64,
        timer: JoinHandle<()>,
    },
    Processing {
        /// Set when a high-priority event or flush arrives mid-batch.
        rerun: bool,
    },
}

struct Scheduler {
    state: SchedulerState,
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Start {
    Now,
    Timer(u64),
}

struct Shared<P> {
    cache: Arc<PageCache<P>>,
    queue: EventQueue,
    rules: RwLock<RuleSet>,
    impact: CategoryImpactMap,
    debounce: Duration,
    scheduler: Mutex<Scheduler>,
    batches_processed: AtomicU64,
    last_batch: Mutex<Option<BatchReport>>,
}

/// Turns data-change events into cache evictions.
///
/// Cloning is cheap and every clone drives the same queue.
pub struct InvalidationCoordinator<P = PageBundle> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for InvalidationCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> InvalidationCoordinator<P>
where
    P: Send + Sync + 'static,
{
    pub fn new(cache: Arc<PageCache<P>>, config: &CoordinatorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                queue: EventQueue::new(),
                rules: RwLock::new(config.rule_set()),
                impact: config.category_impact.clone(),
                debounce: config.debounce(),
                scheduler: Mutex::new(Scheduler {
                    state: SchedulerState::Idle,
                    generation: 0,
                }),
                batches_processed: AtomicU64::new(0),
                last_batch: Mutex::new(None),
            }),
        }
    }

    /// Queue an event.
    ///
    /// High-priority events process the queue immediately; others (re)arm the
    /// debounce timer. Processing failures are logged and leave the batch queued.
    pub async fn notify(&self, kind: EventKind) {
        let immediate = kind.is_high_priority();
        let event = self.shared.queue.publish(kind);
        gauge!(METRIC_INVALIDATION_QUEUE_LEN).set(self.shared.queue.len() as f64);

        if immediate {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type(),
                "High-priority invalidation event, processing now"
            );
            if let Err(err) = self.shared.run(Start::Now) {
                debug!(error = %err, "Immediate invalidation failed, events stay queued");
            }
        } else {
            self.shared.schedule();
        }
    }

    /// Cancel the pending timer and process the queue now.
    ///
    /// Returns `None` when the queue was empty or another batch is running; in
    /// the latter case that batch picks the queue up before finishing.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<Option<BatchReport>, InvalidationError> {
        self.shared.run(Start::Now)
    }

    /// Drop queued events and cancel the pending timer.
    pub fn clear_queue(&self) {
        let mut scheduler = mutex_lock(&self.shared.scheduler, SOURCE, "clear_queue");
        if let SchedulerState::Scheduled { timer, .. } = &scheduler.state {
            timer.abort();
            scheduler.state = SchedulerState::Idle;
        }
        let dropped = self.shared.queue.len();
        self.shared.queue.clear();
        gauge!(METRIC_INVALIDATION_QUEUE_LEN).set(0.0);
        info!(dropped, "Invalidation queue cleared");
    }

    /// Register a rule, replacing any rule for the same event type.
    pub fn add_rule(&self, rule: InvalidationRule) {
        let event_type = rule.event_type;
        let replaced = rw_write(&self.shared.rules, SOURCE, "add_rule").upsert(rule);
        info!(
            event_type = %event_type,
            replaced = replaced.is_some(),
            "Invalidation rule registered"
        );
    }

    pub fn stats(&self) -> CoordinatorStats {
        let phase = match mutex_lock(&self.shared.scheduler, SOURCE, "stats").state {
            SchedulerState::Idle => SchedulerPhase::Idle,
            SchedulerState::Scheduled { .. } => SchedulerPhase::Pending,
            SchedulerState::Processing { .. } => SchedulerPhase::Processing,
        };

        CoordinatorStats {
            queue_length: self.shared.queue.len(),
            is_processing: phase == SchedulerPhase::Processing,
            rules_count: rw_read(&self.shared.rules, SOURCE, "stats").len(),
            last_processed_state: phase,
            batches_processed: self.shared.batches_processed.load(Ordering::Relaxed),
            last_batch: mutex_lock(&self.shared.last_batch, SOURCE, "stats").clone(),
        }
    }

    /// When the armed debounce timer fires, if any.
    pub fn pending_deadline(&self) -> Option<Instant> {
        match mutex_lock(&self.shared.scheduler, SOURCE, "pending_deadline").state {
            SchedulerState::Scheduled { deadline, .. } => Some(deadline),
            _ => None,
        }
    }
}

impl<P> Shared<P>
where
    P: Send + Sync + 'static,
{
    fn schedule(self: &Arc<Self>) {
        let mut scheduler = mutex_lock(&self.scheduler, SOURCE, "schedule");
        self.arm_timer(&mut scheduler);
    }

    /// Replace any armed timer with a fresh one. A running batch reschedules
    /// on completion instead.
    fn arm_timer(self: &Arc<Self>, scheduler: &mut Scheduler) {
        if matches!(scheduler.state, SchedulerState::Processing { .. }) {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(
                queue_length = self.queue.len(),
                "No Tokio runtime for the debounce timer, events stay queued until flush"
            );
            return;
        };

        scheduler.generation += 1;
        let generation = scheduler.generation;
        let deadline = Instant::now() + self.debounce;
        let shared: Weak<Self> = Arc::downgrade(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                if let Err(err) = shared.run(Start::Timer(generation)) {
                    debug!(error = %err, "Debounced invalidation failed, events stay queued");
                }
            }
        });

        let previous = std::mem::replace(
            &mut scheduler.state,
            SchedulerState::Scheduled {
                deadline,
                generation,
                timer,
            },
        );
        if let SchedulerState::Scheduled { timer, .. } = previous {
            timer.abort();
        }
    }

    /// Move to `Processing` if this start is still current.
    fn begin(&self, start: Start) -> bool {
        let mut scheduler = mutex_lock(&self.scheduler, SOURCE, "begin");
        match (&mut scheduler.state, start) {
            (SchedulerState::Processing { rerun }, Start::Now) => {
                *rerun = true;
                return false;
            }
            (SchedulerState::Processing { .. }, Start::Timer(_)) => return false,
            (SchedulerState::Idle, Start::Timer(_)) => return false,
            (SchedulerState::Scheduled { generation, .. }, Start::Timer(expected))
                if *generation != expected =>
            {
                return false;
            }
            _ => {}
        }

        let previous = std::mem::replace(
            &mut scheduler.state,
            SchedulerState::Processing { rerun: false },
        );
        if let (SchedulerState::Scheduled { timer, .. }, Start::Now) = (previous, start) {
            timer.abort();
        }
        true
    }

    /// Process batches until no rerun is requested. Returns the last report.
    fn run(self: &Arc<Self>, start: Start) -> Result<Option<BatchReport>, InvalidationError> {
        if !self.begin(start) {
            return Ok(None);
        }

        let mut last = None;
        loop {
            let outcome = self.process_batch();
            let mut scheduler = mutex_lock(&self.scheduler, SOURCE, "finish");
            let rerun = matches!(scheduler.state, SchedulerState::Processing { rerun: true });

            match outcome {
                Err(err) => {
                    scheduler.state = SchedulerState::Idle;
                    return Err(err);
                }
                Ok(report) => {
                    if report.is_some() {
                        last = report;
                    }
                    if rerun {
                        scheduler.state = SchedulerState::Processing { rerun: false };
                        continue;
                    }
                    scheduler.state = SchedulerState::Idle;
                    if !self.queue.is_empty() {
                        self.arm_timer(&mut scheduler);
                    }
                    return Ok(last);
                }
            }
        }
    }

    #[instrument(skip(self))]
    fn process_batch(&self) -> Result<Option<BatchReport>, InvalidationError> {
        let events = self.queue.drain_all();
        if events.is_empty() {
            return Ok(None);
        }
        gauge!(METRIC_INVALIDATION_QUEUE_LEN).set(self.queue.len() as f64);

        let started_at = std::time::Instant::now();
        let batch_id = Uuid::new_v4();
        let rules = rw_read(&self.rules, SOURCE, "process_batch");
        let plan = InvalidationPlan::from_events(&events, &rules);

        info!(
            %batch_id,
            event_count = events.len(),
            plan = %plan,
            "Invalidation batch starting"
        );

        let (invalidated, discarded) = match self.apply_plan(&plan, &rules) {
            Ok(counts) => counts,
            Err(err) => {
                drop(rules);
                let event_count = events.len();
                self.queue.requeue_front(events);
                gauge!(METRIC_INVALIDATION_QUEUE_LEN).set(self.queue.len() as f64);
                error!(
                    %batch_id,
                    event_count,
                    error = %err,
                    "Invalidation batch failed, events re-queued"
                );
                return Err(err);
            }
        };

        let elapsed = started_at.elapsed();
        histogram!(METRIC_INVALIDATION_BATCH_MS).record(elapsed.as_secs_f64() * 1000.0);

        let report = BatchReport {
            batch_id,
            processed_at: OffsetDateTime::now_utc(),
            event_count: events.len(),
            group_count: plan.groups.len(),
            discarded,
            invalidated,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            %batch_id,
            event_count = report.event_count,
            group_count = report.group_count,
            invalidated,
            discarded,
            duration_ms = report.duration_ms,
            "Invalidation batch complete"
        );

        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        *mutex_lock(&self.last_batch, SOURCE, "record_batch") = Some(report.clone());
        Ok(Some(report))
    }

    /// Apply every group in priority order. Returns `(invalidated, discarded)`.
    fn apply_plan(
        &self,
        plan: &InvalidationPlan,
        rules: &RuleSet,
    ) -> Result<(usize, usize), InvalidationError> {
        let mut invalidated = 0;
        let mut discarded = 0;

        for group in &plan.groups {
            let rule = group.event_type().and_then(|event_type| rules.find(event_type));
            let Some(rule) = rule else {
                warn!(
                    impact_key = %group.impact_key,
                    event_type = group.event_type().map(EventType::as_str),
                    events = group.events.len(),
                    "No invalidation rule for event type, discarding"
                );
                discarded += group.events.len();
                continue;
            };

            let removed = self.apply_rule(rule, group)?;
            debug!(
                impact_key = %group.impact_key,
                scope = %rule.scope,
                priority = group.priority,
                removed,
                "Invalidation group applied"
            );
            invalidated += removed;
        }

        Ok((invalidated, discarded))
    }

    fn apply_rule(
        &self,
        rule: &InvalidationRule,
        group: &EventGroup,
    ) -> Result<usize, InvalidationError> {
        match rule.scope {
            RuleScope::Specific => {
                let brokers: BTreeSet<&str> = group
                    .events
                    .iter()
                    .flat_map(|event| event.kind.broker_ids())
                    .collect();
                Ok(brokers
                    .into_iter()
                    .map(|broker_id| self.cache.invalidate_broker(broker_id))
                    .sum())
            }
            RuleScope::Category => {
                let mut slugs = BTreeSet::new();
                for event in &group.events {
                    slugs.extend(self.impact.slugs_for(event.kind.affected_fields()));
                    if let EventKind::ConfigChange { affected_slugs, .. } = &event.kind {
                        slugs.extend(affected_slugs.iter().cloned());
                    }
                }

                let patterns = slugs
                    .iter()
                    .map(|slug| {
                        KeyPattern::category_slug(slug).map_err(|source| {
                            InvalidationError::pattern(rule.event_type, slug.as_str(), source)
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(patterns
                    .iter()
                    .map(|pattern| self.cache.invalidate(Some(pattern), None))
                    .sum())
            }
            RuleScope::Global => {
                let patterns = rule.key_patterns()?;
                let by_pattern: usize = patterns
                    .iter()
                    .map(|pattern| self.cache.invalidate(Some(pattern), None))
                    .sum();
                let by_dependency: usize = rule
                    .dependencies
                    .iter()
                    .map(|dependency| self.cache.invalidate(None, Some(dependency)))
                    .sum();
                Ok(by_pattern + by_dependency)
            }
        }
    }
}

impl<P> Drop for Shared<P> {
    fn drop(&mut self) {
        let scheduler = match self.scheduler.get_mut() {
            Ok(scheduler) => scheduler,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let SchedulerState::Scheduled { timer, .. } = &scheduler.state {
            timer.abort();
        }
    }
}
