// Request coordinator: serve from cache, join an in-flight generation, or start one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::inflight::{Claim, InFlight, InFlightRegistry, Outcome};
use super::stats::StatsCollector;
use crate::config::{EngineConfig, INFLIGHT_GRACE_MS, INFLIGHT_WAIT_MS};
use crate::error::GenerationError;
use crate::model::{ContentClass, ContentId, Generated, Payload};
use crate::store::ContentStore;

/// Bounds on how long a caller waits for someone else's generation.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub wait: Duration,
    pub grace: Duration,
    pub regenerate_on_timeout: bool,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(INFLIGHT_WAIT_MS),
            grace: Duration::from_millis(INFLIGHT_GRACE_MS),
            regenerate_on_timeout: true,
        }
    }
}

impl WaitPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            wait: config.inflight_wait(),
            grace: config.inflight_grace(),
            regenerate_on_timeout: config.regenerate_on_timeout,
        }
    }
}

pub struct Coordinator {
    store: Arc<ContentStore>,
    registry: Arc<InFlightRegistry>,
    stats: Arc<StatsCollector>,
    policy: WaitPolicy,
}

impl Coordinator {
    pub fn new(store: Arc<ContentStore>, policy: WaitPolicy) -> Self {
        Self {
            store,
            registry: Arc::new(InFlightRegistry::new()),
            stats: Arc::new(StatsCollector::new()),
            policy,
        }
    }

    /// Return the content for `(class, key)`, generating it at most once.
    ///
    /// A cache hit returns immediately. Otherwise the first caller runs
    /// `generator` and stores its result; concurrent callers wait for that
    /// result instead of generating again. Generation runs in its own task,
    /// so dropping the returned future does not stop it and its result still
    /// reaches the cache. Failures are returned to every waiting caller and
    /// never cached. Every caller, including the one that started the
    /// generation, gets a result or a timeout within the wait policy bounds.
    pub async fn ensure_generated<F, Fut>(
        &self,
        class: ContentClass,
        key: &ContentId,
        generator: F,
    ) -> Result<Payload, GenerationError>
    where
        F: FnOnce(ContentId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated, GenerationError>> + Send + 'static,
    {
        if let Some(record) = self.store.get(class, key).await {
            self.stats.record_hit();
            debug!("cache hit {}/{}", class, key);
            return Ok(record.payload);
        }
        self.stats.record_miss();

        match self.registry.claim(class, key) {
            Claim::Leader(entry) => self.lead(class, key, entry, generator).await,
            Claim::Waiter(entry) => self.wait_for_inflight(class, key, entry, generator).await,
        }
    }

    pub fn is_in_flight(&self, class: ContentClass, key: &ContentId) -> bool {
        self.registry.contains(class, key)
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    async fn lead<F, Fut>(
        &self,
        class: ContentClass,
        key: &ContentId,
        entry: Arc<InFlight>,
        generator: F,
    ) -> Result<Payload, GenerationError>
    where
        F: FnOnce(ContentId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated, GenerationError>> + Send + 'static,
    {
        // Double-check: a generation may have finished between our miss and the claim.
        if let Some(record) = self.store.get(class, key).await {
            debug!("cache filled while claiming {}/{}", class, key);
            self.registry.release(class, key, &entry);
            entry.publish(Ok(record.payload.clone()));
            return Ok(record.payload);
        }

        self.spawn_generation(class, key.clone(), Arc::clone(&entry), generator);

        // The leader is held to the same bounds as a waiter: a hung generator
        // must not pin its first caller forever.
        match self.bounded_wait(class, key, &entry).await {
            Some(outcome) => outcome,
            None => {
                self.stats.record_timeout();
                warn!("own generation of {}/{} id={} timed out", class, key, entry.id());
                Err(timeout_error(class, key))
            }
        }
    }

    async fn wait_for_inflight<F, Fut>(
        &self,
        class: ContentClass,
        key: &ContentId,
        entry: Arc<InFlight>,
        generator: F,
    ) -> Result<Payload, GenerationError>
    where
        F: FnOnce(ContentId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated, GenerationError>> + Send + 'static,
    {
        self.stats.record_dedup_wait();
        debug!(
            "joining in-flight generation {}/{} id={}",
            class,
            key,
            entry.id()
        );

        if let Some(outcome) = self.bounded_wait(class, key, &entry).await {
            return outcome;
        }
        self.stats.record_timeout();

        if !self.policy.regenerate_on_timeout {
            warn!("gave up waiting on {}/{} id={}", class, key, entry.id());
            return Err(timeout_error(class, key));
        }

        warn!(
            "generation {}/{} id={} still pending, attempting one regeneration",
            class,
            key,
            entry.id()
        );
        self.stats.record_regeneration();
        let replacement = match self.registry.take_over(class, key, &entry) {
            Claim::Leader(fresh) => {
                self.spawn_generation(class, key.clone(), Arc::clone(&fresh), generator);
                relay_outcome(&fresh, &entry);
                fresh
            }
            Claim::Waiter(other) => other,
        };

        match self.bounded_wait(class, key, &replacement).await {
            Some(outcome) => outcome,
            None => {
                self.stats.record_timeout();
                warn!("regeneration of {}/{} timed out", class, key);
                Err(timeout_error(class, key))
            }
        }
    }

    /// Wait for `entry` within the policy bounds: the main wait, then a grace
    /// period, then one last look at the store. `None` means nothing arrived.
    async fn bounded_wait(&self, class: ContentClass, key: &ContentId, entry: &Arc<InFlight>) -> Option<Outcome> {
        let mut rx = entry.subscribe();

        if let Ok(outcome) = timeout(self.policy.wait, await_outcome(&mut rx)).await {
            return Some(outcome);
        }
        debug!(
            "generation {}/{} not done after {:?}, grace {:?}",
            class, key, self.policy.wait, self.policy.grace
        );
        if let Ok(outcome) = timeout(self.policy.grace, await_outcome(&mut rx)).await {
            return Some(outcome);
        }

        self.store.get(class, key).await.map(|record| Ok(record.payload))
    }

    fn spawn_generation<F, Fut>(&self, class: ContentClass, key: ContentId, entry: Arc<InFlight>, generator: F)
    where
        F: FnOnce(ContentId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generated, GenerationError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);

        stats.generation_started();
        info!("generating {}/{} id={}", class, key, entry.id());

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            // Inner task so a panicking generator still resolves the entry.
            let result = match tokio::spawn(generator(key.clone())).await {
                Ok(result) => result,
                Err(e) => Err(GenerationError::GenerationFailure(format!(
                    "generator task failed: {}",
                    e
                ))),
            };

            let outcome = match result {
                Ok(generated) => {
                    store
                        .set(class, &key, generated.payload.clone(), generated.metadata)
                        .await;
                    info!(
                        "generated {}/{} bytes={} elapsed_ms={}",
                        class,
                        key,
                        generated.payload.len(),
                        started.elapsed().as_millis()
                    );
                    Ok(generated.payload)
                }
                Err(e) => {
                    warn!("generation {}/{} failed: {}", class, key, e);
                    Err(e)
                }
            };

            stats.generation_finished(outcome.is_ok());
            registry.release(class, &key, &entry);
            entry.publish(outcome);
        });
    }
}

/// Publish the outcome of `replacement` to callers still subscribed to the
/// abandoned `stale` entry.
fn relay_outcome(replacement: &Arc<InFlight>, stale: &Arc<InFlight>) {
    let mut rx = replacement.subscribe();
    let stale = Arc::clone(stale);
    tokio::spawn(async move {
        let outcome = await_outcome(&mut rx).await;
        debug!("relaying outcome of replacement to stale entry id={}", stale.id());
        stale.publish(outcome);
    });
}

async fn await_outcome(rx: &mut watch::Receiver<Option<Outcome>>) -> Outcome {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone().unwrap_or_else(|| {
            Err(GenerationError::GenerationFailure(
                "generation finished without a result".into(),
            ))
        }),
        Err(_) => Err(GenerationError::GenerationFailure(
            "generation abandoned without a result".into(),
        )),
    }
}

fn timeout_error(class: ContentClass, key: &ContentId) -> GenerationError {
    GenerationError::Timeout {
        class,
        key: key.to_string(),
    }
}
