//! The AI computation engine.
//!
//! [`AiEngine::request_decision`] never blocks the tick thread. It answers
//! from the cache or a behavior tree synchronously, and otherwise hands the
//! situation to an [`InferenceModel`] on a bounded worker pool and returns a
//! [`DecisionHandle`] the scheduler polls on later ticks.
//!
//! # Request algorithm
//!
//! 1. Fingerprint the situation.
//! 2. If a computation for the same `(entity, situation class)` is in
//!    flight, return its handle (coalescing).
//! 3. On a cache hit, adapt the cached decision and return it resolved.
//! 4. If another entity's computation for the same fingerprint is in
//!    flight, derive a handle from it that adapts its result.
//! 5. Otherwise evaluate the class's behavior tree; a successful tree with
//!    an intent is the decision.
//! 6. Otherwise dispatch to the model, bounded by the worker semaphore and
//!    by `decision_timeout` measured from dispatch (slot wait included).
//!    A timeout or worker failure resolves to the fallback decision.
//! 7. With no model configured, return the fallback decision.
//!
//! Every path records an [`Experience`](crate::experience::Experience).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guildhall_types::{ActionKind, Decision, DecisionOrigin, Fingerprint, NpcId, Situation, SituationClass};

use crate::adapt::{DecisionAdapter, RetimingAdapter};
use crate::behavior::{BehaviorEvaluator, BehaviorRegistry};
use crate::cache::{CacheStats, DecisionCache};
use crate::experience::{ExperienceLog, Outcome};
use crate::learning::{LearningReport, PolicyWeights};
use crate::model::InferenceModel;

/// Confidence assigned to decisions produced by a behavior tree.
pub const TREE_CONFIDENCE: f32 = 0.9;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine tuning. Every duration and tick count here is configuration.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Maximum concurrent model computations.
    pub worker_threads: usize,
    /// Hard bound on a model computation, measured from dispatch.
    pub decision_timeout: Duration,
    /// Decision cache capacity.
    pub cache_capacity: usize,
    /// Ticks a cached decision stays reusable.
    pub cache_ttl_ticks: u64,
    /// Ticks a fresh decision stays in force once applied.
    pub decision_validity_ticks: u64,
    /// Experience log capacity.
    pub experience_capacity: usize,
    /// Experiences sampled per learning pass.
    pub learning_batch: usize,
    /// EMA smoothing factor for policy weights.
    pub learning_rate: f32,
    /// Action handed out when nothing else decides.
    pub fallback_action: ActionKind,
    /// Seed for learning-pass sampling. Unset seeds from the OS.
    pub learning_seed: Option<u64>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            decision_timeout: Duration::from_millis(250),
            cache_capacity: 1024,
            cache_ttl_ticks: 30,
            decision_validity_ticks: 10,
            experience_capacity: 4096,
            learning_batch: 64,
            learning_rate: 0.1,
            fallback_action: ActionKind::Idle,
            learning_seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a model computation produced no decision. Never surfaced to callers:
/// every variant resolves the handle to the fallback decision.
#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
    /// The deadline elapsed before the model answered.
    #[error("decision for npc {entity} exceeded the {deadline_ms}ms deadline")]
    Timeout {
        /// The NPC.
        entity: NpcId,
        /// The configured deadline.
        deadline_ms: u64,
    },

    /// The worker semaphore was closed.
    #[error("worker pool closed: {reason}")]
    PoolClosed {
        /// Underlying error text.
        reason: String,
    },

    /// The blocking worker panicked or was cancelled.
    #[error("inference worker failed: {reason}")]
    WorkerFailed {
        /// Underlying error text.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Shared, cloneable future of one decision.
///
/// Poll it without blocking via [`DecisionHandle::try_get`], or `.await` it.
#[derive(Clone)]
pub struct DecisionHandle {
    request_id: u64,
    entity: NpcId,
    class: SituationClass,
    requested_at: u64,
    stale: Arc<AtomicBool>,
    future: Shared<BoxFuture<'static, Decision>>,
}

impl core::fmt::Debug for DecisionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecisionHandle")
            .field("request_id", &self.request_id)
            .field("entity", &self.entity)
            .field("class", &self.class)
            .field("requested_at", &self.requested_at)
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

impl DecisionHandle {
    fn resolved(request_id: u64, entity: NpcId, class: SituationClass, tick: u64, decision: Decision) -> Self {
        Self {
            request_id,
            entity,
            class,
            requested_at: tick,
            stale: Arc::new(AtomicBool::new(false)),
            future: futures::future::ready(decision).boxed().shared(),
        }
    }

    /// The NPC the decision is for.
    pub const fn entity(&self) -> NpcId {
        self.entity
    }

    /// Situation class of the request.
    pub const fn class(&self) -> SituationClass {
        self.class
    }

    /// Tick the request was made.
    pub const fn requested_at(&self) -> u64 {
        self.requested_at
    }

    /// Whether [`AiEngine::cancel`] invalidated this request.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// The decision if it has resolved, without blocking.
    pub fn try_get(&self) -> Option<Decision> {
        self.future
            .peek()
            .cloned()
            .or_else(|| self.future.clone().now_or_never())
    }

    /// Whether the decision has resolved.
    pub fn is_ready(&self) -> bool {
        self.try_get().is_some()
    }
}

impl Future for DecisionHandle {
    type Output = Decision;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Engine counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AiStats {
    /// Calls to `request_decision`.
    pub requests: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Requests merged onto an in-flight computation.
    pub coalesced: u64,
    /// Behavior tree evaluations.
    pub tree_evaluations: u64,
    /// Computations sent to the worker pool.
    pub model_dispatches: u64,
    /// Computations that exceeded the deadline.
    pub timeouts: u64,
    /// Fallback decisions handed out.
    pub fallbacks: u64,
    /// Computations currently in flight.
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    tree_evaluations: AtomicU64,
    model_dispatches: AtomicU64,
    timeouts: AtomicU64,
    fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InFlight {
    /// Every pending request, derived ones included.
    by_entity: HashMap<(NpcId, SituationClass), DecisionHandle>,
    /// Model computations only.
    by_fingerprint: HashMap<Fingerprint, DecisionHandle>,
}

impl InFlight {
    fn pending_for(&self, fingerprint: Fingerprint) -> Option<&DecisionHandle> {
        self.by_fingerprint
            .get(&fingerprint)
            .filter(|h| !h.is_stale() && !h.is_ready())
    }
}

struct EngineInner {
    config: AiConfig,
    runtime: Handle,
    workers: Arc<Semaphore>,
    cache: DecisionCache,
    behavior: Option<BehaviorEvaluator>,
    model: Option<Arc<dyn InferenceModel>>,
    adapter: Arc<dyn DecisionAdapter>,
    experiences: ExperienceLog,
    weights: RwLock<Arc<PolicyWeights>>,
    in_flight: Mutex<InFlight>,
    counters: Counters,
    next_request: AtomicU64,
    learning: AtomicBool,
    sampler: Mutex<StdRng>,
}

/// Clears the learning flag when a pass ends, panicking or not.
struct LearningGuard(Arc<EngineInner>);

impl Drop for LearningGuard {
    fn drop(&mut self) {
        self.0.learning.store(false, Ordering::Release);
    }
}

/// Builder for [`AiEngine`].
pub struct AiEngineBuilder {
    config: AiConfig,
    runtime: Handle,
    behavior: Option<Arc<BehaviorRegistry>>,
    model: Option<Arc<dyn InferenceModel>>,
    adapter: Option<Arc<dyn DecisionAdapter>>,
}

impl core::fmt::Debug for AiEngineBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AiEngineBuilder")
            .field("config", &self.config)
            .field("behavior", &self.behavior.is_some())
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .finish_non_exhaustive()
    }
}

impl AiEngineBuilder {
    /// Use `registry` to decide situation classes that have a tree.
    #[must_use]
    pub fn behavior(mut self, registry: Arc<BehaviorRegistry>) -> Self {
        self.behavior = Some(registry);
        self
    }

    /// Dispatch undecided situations to `model`.
    #[must_use]
    pub fn model(mut self, model: impl InferenceModel + 'static) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// Replace the default [`RetimingAdapter`].
    #[must_use]
    pub fn adapter(mut self, adapter: impl DecisionAdapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Finish construction.
    pub fn build(self) -> AiEngine {
        let config = self.config;
        let adapter = self
            .adapter
            .unwrap_or_else(|| Arc::new(RetimingAdapter::new(config.decision_validity_ticks)));
        info!(
            workers = config.worker_threads,
            timeout_ms = duration_ms(config.decision_timeout),
            cache_capacity = config.cache_capacity,
            cache_ttl_ticks = config.cache_ttl_ticks,
            trees = self.behavior.as_ref().map_or(0, |r| r.len()),
            model = self.model.as_ref().map_or("none", |m| m.name()),
            "AI engine initialized"
        );
        AiEngine {
            inner: Arc::new(EngineInner {
                runtime: self.runtime,
                workers: Arc::new(Semaphore::new(config.worker_threads.max(1))),
                cache: DecisionCache::new(config.cache_capacity, config.cache_ttl_ticks),
                behavior: self.behavior.map(BehaviorEvaluator::new),
                model: self.model,
                adapter,
                experiences: ExperienceLog::new(config.experience_capacity),
                weights: RwLock::new(Arc::new(PolicyWeights::new())),
                in_flight: Mutex::new(InFlight::default()),
                counters: Counters::default(),
                next_request: AtomicU64::new(0),
                learning: AtomicBool::new(false),
                sampler: Mutex::new(
                    config
                        .learning_seed
                        .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64),
                ),
                config,
            }),
        }
    }
}

/// Cache, behavior trees, and asynchronous model computation.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct AiEngine {
    inner: Arc<EngineInner>,
}

impl core::fmt::Debug for AiEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AiEngine")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl AiEngine {
    /// Start building an engine whose workers run on `runtime`.
    pub fn builder(config: AiConfig, runtime: Handle) -> AiEngineBuilder {
        AiEngineBuilder {
            config,
            runtime,
            behavior: None,
            model: None,
            adapter: None,
        }
    }

    /// Request a decision for `entity` in `situation`.
    pub fn request_decision(&self, entity: NpcId, situation: Situation) -> DecisionHandle {
        let inner = &self.inner;
        bump(&inner.counters.requests);
        let class = situation.class;
        let tick = situation.tick;
        let key = (entity, class);
        let fingerprint = situation.fingerprint();

        let mut in_flight = inner.in_flight.lock();
        if let Some(existing) = in_flight.by_entity.get(&key) {
            if !existing.is_stale() && !existing.is_ready() {
                bump(&inner.counters.coalesced);
                debug!(npc = %entity, class = %class, "Coalesced onto in-flight decision");
                return existing.clone();
            }
            in_flight.by_entity.remove(&key);
        }

        let situation = Arc::new(situation);

        if let Some(cached) = inner.cache.get(fingerprint, tick) {
            bump(&inner.counters.cache_hits);
            let decision = inner.adapter.adapt(&cached, &situation);
            debug!(npc = %entity, fingerprint = %fingerprint, action = ?decision.action, "Decision cache hit");
            return inner.settle(entity, situation, decision);
        }

        if let Some(source) = in_flight.pending_for(fingerprint).cloned() {
            bump(&inner.counters.coalesced);
            debug!(npc = %entity, fingerprint = %fingerprint, source = %source.entity, "Sharing in-flight computation");
            return Arc::clone(inner).derive(&source, entity, situation, &mut in_flight);
        }

        if let Some(decision) = inner.decide_by_tree(&situation) {
            inner.cache.put_default(fingerprint, decision.clone(), tick);
            return inner.settle(entity, situation, decision);
        }

        if let Some(model) = inner.model.clone() {
            return Arc::clone(inner).dispatch(model, entity, situation, fingerprint, &mut in_flight);
        }

        bump(&inner.counters.fallbacks);
        let decision = inner.fallback(tick, "no behavior tree or model decided");
        inner.settle(entity, situation, decision)
    }

    /// Mark every in-flight request for `entity` stale. Returns how many.
    pub fn cancel(&self, entity: NpcId) -> usize {
        let mut in_flight = self.inner.in_flight.lock();
        let keys: Vec<_> = in_flight
            .by_entity
            .keys()
            .filter(|(npc, _)| *npc == entity)
            .copied()
            .collect();
        for key in &keys {
            if let Some(handle) = in_flight.by_entity.remove(key) {
                handle.stale.store(true, Ordering::Release);
            }
        }
        in_flight.by_fingerprint.retain(|_, h| h.entity != entity);
        if !keys.is_empty() {
            debug!(npc = %entity, cancelled = keys.len(), "Cancelled in-flight decisions");
        }
        keys.len()
    }

    /// Attach `outcome` to `entity`'s most recent open experience.
    pub fn record_outcome(&self, entity: NpcId, outcome: Outcome) -> bool {
        self.inner.experiences.attach_outcome(entity, outcome)
    }

    /// Run one learning pass on a blocking worker.
    ///
    /// Returns `None` if a pass is already running.
    pub fn spawn_learning(&self) -> Option<JoinHandle<LearningReport>> {
        if self.inner.learning.swap(true, Ordering::AcqRel) {
            return None;
        }
        let guard = LearningGuard(Arc::clone(&self.inner));
        Some(self.inner.runtime.spawn_blocking(move || guard.0.learn()))
    }

    /// Run one learning pass on the calling thread.
    pub fn learn_now(&self) -> LearningReport {
        self.inner.learn()
    }

    /// Current policy weights.
    pub fn weights(&self) -> Arc<PolicyWeights> {
        Arc::clone(&*self.inner.weights.read())
    }

    /// Drop expired cache entries. Returns how many.
    pub fn sweep_cache(&self, now_tick: u64) -> usize {
        self.inner.cache.sweep(now_tick)
    }

    /// The decision cache.
    pub fn cache(&self) -> &DecisionCache {
        &self.inner.cache
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// The experience log.
    pub fn experiences(&self) -> &ExperienceLog {
        &self.inner.experiences
    }

    /// Engine configuration.
    pub fn config(&self) -> &AiConfig {
        &self.inner.config
    }

    /// Engine counters.
    pub fn stats(&self) -> AiStats {
        let c = &self.inner.counters;
        AiStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            tree_evaluations: c.tree_evaluations.load(Ordering::Relaxed),
            model_dispatches: c.model_dispatches.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.lock().by_entity.len(),
        }
    }
}

impl EngineInner {
    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    fn fallback(&self, tick: u64, reason: &str) -> Decision {
        Decision::fallback(
            self.config.fallback_action,
            tick.saturating_add(self.config.decision_validity_ticks),
            reason,
        )
    }

    /// Record a synchronously decided request and return it resolved.
    fn settle(&self, entity: NpcId, situation: Arc<Situation>, decision: Decision) -> DecisionHandle {
        let class = situation.class;
        let tick = situation.tick;
        self.experiences.record(entity, situation, decision.clone(), tick);
        DecisionHandle::resolved(self.next_request_id(), entity, class, tick, decision)
    }

    fn decide_by_tree(&self, situation: &Situation) -> Option<Decision> {
        let tree = self.behavior.as_ref()?.registry().tree_for(situation.class)?;
        bump(&self.counters.tree_evaluations);
        let result = tree.evaluate(situation);
        let action = result.decided_action()?;
        debug!(npc = %situation.entity, tree = %tree.id, action = ?action, "Behavior tree decided");
        Some(
            Decision::new(
                action,
                TREE_CONFIDENCE,
                situation.tick.saturating_add(self.config.decision_validity_ticks),
                DecisionOrigin::BehaviorTree,
            )
            .with_reason(format!("tree {}", tree.id)),
        )
    }

    fn dispatch(
        self: Arc<Self>,
        model: Arc<dyn InferenceModel>,
        entity: NpcId,
        situation: Arc<Situation>,
        fingerprint: Fingerprint,
        in_flight: &mut InFlight,
    ) -> DecisionHandle {
        bump(&self.counters.model_dispatches);
        let request_id = self.next_request_id();
        let class = situation.class;
        let tick = situation.tick;
        let stale = Arc::new(AtomicBool::new(false));
        debug!(npc = %entity, class = %class, request = request_id, "Dispatching decision to worker pool");

        let inner = Arc::clone(&self);
        let task_stale = Arc::clone(&stale);
        let task = self.runtime.spawn(async move {
            let decision = match inner.compute(model, entity, Arc::clone(&situation)).await {
                Ok(decision) => {
                    if !task_stale.load(Ordering::Acquire) {
                        inner.cache.put_default(fingerprint, decision.clone(), tick);
                    }
                    decision
                }
                Err(error) => {
                    if matches!(error, ComputationError::Timeout { .. }) {
                        bump(&inner.counters.timeouts);
                    }
                    bump(&inner.counters.fallbacks);
                    warn!(npc = %entity, error = %error, "AI computation failed, using fallback");
                    inner.fallback(tick, &error.to_string())
                }
            };
            inner.experiences.record(entity, situation, decision.clone(), tick);
            inner.finish(entity, class, Some(fingerprint), request_id);
            decision
        });

        let aborted = self.fallback(tick, "inference task aborted");
        let future = async move { task.await.unwrap_or(aborted) }.boxed().shared();
        let handle = DecisionHandle {
            request_id,
            entity,
            class,
            requested_at: tick,
            stale,
            future,
        };
        in_flight.by_entity.insert((entity, class), handle.clone());
        in_flight.by_fingerprint.insert(fingerprint, handle.clone());
        handle
    }

    /// Hand `entity` the result of `source`, adapted to its own situation.
    ///
    /// The derived request records its own experience and can be cancelled
    /// on its own; only `source` writes the cache.
    fn derive(
        self: Arc<Self>,
        source: &DecisionHandle,
        entity: NpcId,
        situation: Arc<Situation>,
        in_flight: &mut InFlight,
    ) -> DecisionHandle {
        let request_id = self.next_request_id();
        let class = situation.class;
        let tick = situation.tick;

        let inner = Arc::clone(&self);
        let shared = source.future.clone();
        let task = self.runtime.spawn(async move {
            let computed = shared.await;
            let decision = if computed.origin == DecisionOrigin::Fallback {
                computed
            } else {
                inner.adapter.adapt(&computed, &situation)
            };
            inner.experiences.record(entity, situation, decision.clone(), tick);
            inner.finish(entity, class, None, request_id);
            decision
        });

        let aborted = self.fallback(tick, "inference task aborted");
        let handle = DecisionHandle {
            request_id,
            entity,
            class,
            requested_at: tick,
            stale: Arc::new(AtomicBool::new(false)),
            future: async move { task.await.unwrap_or(aborted) }.boxed().shared(),
        };
        in_flight.by_entity.insert((entity, class), handle.clone());
        handle
    }

    async fn compute(
        &self,
        model: Arc<dyn InferenceModel>,
        entity: NpcId,
        situation: Arc<Situation>,
    ) -> Result<Decision, ComputationError> {
        let deadline = self.config.decision_timeout;
        let workers = Arc::clone(&self.workers);
        let weights = Arc::clone(&*self.weights.read());

        let work = async move {
            let permit = workers
                .acquire_owned()
                .await
                .map_err(|closed| ComputationError::PoolClosed {
                    reason: closed.to_string(),
                })?;
            tokio::task::spawn_blocking(move || {
                // The slot stays taken until the model returns, even past the deadline.
                let _permit = permit;
                model.infer(&situation, &weights)
            })
            .await
            .map_err(|join| ComputationError::WorkerFailed {
                reason: join.to_string(),
            })
        };

        tokio::time::timeout(deadline, work)
            .await
            .map_err(|_elapsed| ComputationError::Timeout {
                entity,
                deadline_ms: duration_ms(deadline),
            })?
    }

    fn finish(&self, entity: NpcId, class: SituationClass, fingerprint: Option<Fingerprint>, request_id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .by_entity
            .get(&(entity, class))
            .is_some_and(|h| h.request_id == request_id)
        {
            in_flight.by_entity.remove(&(entity, class));
        }
        let owned = fingerprint.filter(|f| {
            in_flight
                .by_fingerprint
                .get(f)
                .is_some_and(|h| h.request_id == request_id)
        });
        if let Some(fingerprint) = owned {
            in_flight.by_fingerprint.remove(&fingerprint);
        }
    }

    fn learn(&self) -> LearningReport {
        let batch = self
            .experiences
            .sample_with_outcomes(&mut *self.sampler.lock(), self.config.learning_batch);
        let current = Arc::clone(&*self.weights.read());
        let next = current.updated(&batch, self.config.learning_rate);
        let report = LearningReport {
            sampled: batch.len(),
            total_samples: next.samples(),
        };
        *self.weights.write() = Arc::new(next);
        debug!(sampled = report.sampled, total = report.total_samples, "Policy weights updated");
        report
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    use guildhall_types::{ActionTag, Resource};

    use super::*;
    use crate::model::WeightedPolicyModel;

    /// Counts invocations and sleeps briefly before answering.
    struct CountingModel {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl InferenceModel for CountingModel {
        fn infer(&self, situation: &Situation, _weights: &PolicyWeights) -> Decision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Decision::new(ActionKind::Patrol, 0.7, situation.tick.saturating_add(5), DecisionOrigin::Model)
        }
    }

    /// Blocks until released or ten seconds pass.
    struct StallModel {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl InferenceModel for StallModel {
        fn infer(&self, situation: &Situation, _weights: &PolicyWeights) -> Decision {
            let _ = self.release.lock().recv_timeout(Duration::from_secs(10));
            Decision::new(ActionKind::Attack { target: situation.entity }, 1.0, 0, DecisionOrigin::Model)
        }
    }

    fn counting(delay_ms: u64) -> (CountingModel, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = CountingModel {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(delay_ms),
        };
        (model, calls)
    }

    fn situation(entity: NpcId, tick: u64) -> Situation {
        Situation::new(entity, SituationClass::Economy, tick)
            .with_fact("stockpile", 12)
            .with_option(ActionKind::Gather { resource: Resource::Food })
            .with_option(ActionKind::Patrol)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identical_situations_invoke_model_once() {
        let (model, calls) = counting(0);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .model(model)
            .build();
        let npc = NpcId::new();

        let first = engine.request_decision(npc, situation(npc, 1)).await;
        assert_eq!(first.origin, DecisionOrigin::Model);

        let other = NpcId::new();
        let second = engine.request_decision(other, situation(other, 2)).await;
        assert_eq!(second.origin, DecisionOrigin::Cache);
        assert_eq!(second.action, first.action);
        assert_eq!(second.valid_until, 2 + AiConfig::default().decision_validity_ticks);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = engine.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.model_dispatches, 1);
        assert_eq!(engine.experiences().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_coalesce() {
        let (model, calls) = counting(100);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .model(model)
            .build();
        let npc = NpcId::new();

        let a = engine.request_decision(npc, situation(npc, 1));
        let b = engine.request_decision(npc, situation(npc, 1).with_fact("stockpile", 13));
        assert_eq!(engine.stats().coalesced, 1);
        assert_eq!(engine.stats().in_flight, 1);

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_fingerprint_from_two_entities_runs_model_once() {
        let (model, calls) = counting(100);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .model(model)
            .build();
        let first_npc = NpcId::new();
        let second_npc = NpcId::new();
        let first_situation = situation(first_npc, 1);
        let second_situation = situation(second_npc, 2).with_volatile("health", 40);
        assert_eq!(first_situation.fingerprint(), second_situation.fingerprint());

        let first = engine.request_decision(first_npc, first_situation);
        let second = engine.request_decision(second_npc, second_situation);
        assert_eq!(second.entity(), second_npc);
        assert_eq!(engine.stats().model_dispatches, 1);
        assert_eq!(engine.stats().coalesced, 1);
        assert_eq!(engine.stats().in_flight, 2);

        let (first, second) = tokio::join!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.origin, DecisionOrigin::Model);
        assert_eq!(second.origin, DecisionOrigin::Cache);
        assert_eq!(second.action, first.action);
        assert_eq!(second.valid_until, 2 + AiConfig::default().decision_validity_ticks);

        assert_eq!(engine.experiences().len(), 2);
        assert_eq!(engine.experiences().latest_for(second_npc).unwrap().decision, second);
        assert_eq!(engine.stats().in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_a_sharer_leaves_the_source_running() {
        let (model, calls) = counting(100);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .model(model)
            .build();
        let source_npc = NpcId::new();
        let sharer_npc = NpcId::new();

        let source = engine.request_decision(source_npc, situation(source_npc, 1));
        let sharer = engine.request_decision(sharer_npc, situation(sharer_npc, 1));
        assert_eq!(engine.cancel(sharer_npc), 1);
        assert!(sharer.is_stale());
        assert!(!source.is_stale());

        assert_eq!(source.await.origin, DecisionOrigin::Model);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_model_resolves_to_fallback_within_deadline() {
        let (release, gate) = mpsc::channel();
        let config = AiConfig {
            worker_threads: 1,
            decision_timeout: Duration::from_secs(1),
            fallback_action: ActionKind::Defend,
            ..AiConfig::default()
        };
        let engine = AiEngine::builder(config, Handle::current())
            .model(StallModel { release: Mutex::new(gate) })
            .build();

        let stalled = NpcId::new();
        let queued = NpcId::new();
        let started = Instant::now();
        let first = engine.request_decision(stalled, situation(stalled, 1));
        // Waits for the single worker slot; the wait counts against its deadline.
        let second = engine.request_decision(queued, situation(queued, 1).with_fact("stockpile", 3));
        let (first, second) = tokio::join!(first, second);
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        assert_eq!(first.action, ActionKind::Defend);
        assert_eq!(first.origin, DecisionOrigin::Fallback);
        assert_eq!(second.origin, DecisionOrigin::Fallback);
        assert_eq!(engine.stats().timeouts, 2);
        assert!(engine.cache().is_empty());

        drop(release);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn behavior_tree_decides_without_model() {
        let mut builder = BehaviorRegistry::builder();
        builder
            .register_yaml("- id: economy\n  class: economy\n  root:\n    kind: action\n    action: gather\n")
            .unwrap();
        let (model, calls) = counting(0);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .behavior(builder.build())
            .model(model)
            .build();
        let npc = NpcId::new();

        let handle = engine.request_decision(npc, situation(npc, 3));
        let decision = handle.try_get().unwrap();
        assert_eq!(decision.origin, DecisionOrigin::BehaviorTree);
        assert_eq!(decision.action, ActionKind::Gather { resource: Resource::Food });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.stats().tree_evaluations, 1);
    }

    #[tokio::test]
    async fn no_decider_yields_fallback() {
        let engine = AiEngine::builder(AiConfig::default(), Handle::current()).build();
        let npc = NpcId::new();
        let decision = engine.request_decision(npc, situation(npc, 0)).try_get().unwrap();
        assert_eq!(decision.origin, DecisionOrigin::Fallback);
        assert_eq!(decision.action, ActionKind::Idle);
        assert_eq!(engine.stats().fallbacks, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_marks_handles_stale() {
        let (model, _calls) = counting(100);
        let engine = AiEngine::builder(AiConfig::default(), Handle::current())
            .model(model)
            .build();
        let npc = NpcId::new();
        let handle = engine.request_decision(npc, situation(npc, 1));
        assert_eq!(engine.cancel(npc), 1);
        assert!(handle.is_stale());
        let _ = handle.clone().await;
        assert!(engine.cache().is_empty());

        // A fresh request after cancellation is not coalesced onto the stale one.
        let fresh = engine.request_decision(npc, situation(npc, 2));
        assert!(!fresh.is_stale());
        assert_eq!(engine.stats().coalesced, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn learning_shifts_weights_toward_rewarded_actions() {
        let config = AiConfig {
            learning_rate: 0.5,
            cache_ttl_ticks: 0,
            ..AiConfig::default()
        };
        let engine = AiEngine::builder(config, Handle::current())
            .model(WeightedPolicyModel::new(5))
            .build();

        for tick in 0..4 {
            let npc = NpcId::new();
            let decision = engine.request_decision(npc, situation(npc, tick)).await;
            assert_eq!(decision.action.tag(), ActionTag::Gather);
            assert!(engine.record_outcome(npc, Outcome { reward: -1.0, observed_at: tick + 1 }));
        }

        let report = engine.spawn_learning().unwrap().await.unwrap();
        assert_eq!(report.sampled, 4);
        assert!(engine.weights().weight(ActionTag::Gather) < 0.0);

        let npc = NpcId::new();
        let decision = engine.request_decision(npc, situation(npc, 10)).await;
        assert_eq!(decision.action, ActionKind::Patrol);
    }

    #[tokio::test]
    async fn learning_flag_clears_when_a_pass_panics() {
        let engine = AiEngine::builder(AiConfig::default(), Handle::current()).build();
        engine.inner.learning.store(true, Ordering::Release);
        assert!(engine.spawn_learning().is_none());

        let guard = LearningGuard(Arc::clone(&engine.inner));
        let pass = std::thread::spawn(move || {
            let _guard = guard;
            panic!("learning pass failed");
        });
        assert!(pass.join().is_err());

        let report = engine.spawn_learning().unwrap().await.unwrap();
        assert_eq!(report.sampled, 0);
        assert!(!engine.inner.learning.load(Ordering::Acquire));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn seeded_learning_is_reproducible() {
        async fn run(seed: u64) -> PolicyWeights {
            let config = AiConfig {
                learning_batch: 3,
                learning_rate: 0.5,
                cache_ttl_ticks: 0,
                learning_seed: Some(seed),
                ..AiConfig::default()
            };
            let engine = AiEngine::builder(config, Handle::current())
                .model(WeightedPolicyModel::new(5))
                .build();
            for tick in 0..8 {
                let npc = NpcId::new();
                // Rewards differ per entry, so the EMA depends on sample order.
                let reward = if tick % 2 == 0 { 1.0 } else { -0.5 };
                engine.request_decision(npc, situation(npc, tick)).await;
                engine.record_outcome(npc, Outcome { reward, observed_at: tick + 1 });
            }
            engine.learn_now();
            engine.learn_now();
            (*engine.weights()).clone()
        }

        assert_eq!(run(11).await, run(11).await);
    }
}
