// Background prefetch scheduler. Warms the cache for the current and next item.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PrefetchConfig;
use crate::error::GenerationError;
use crate::model::{ContentClass, ContentId, PoemRecord};

/// Whatever performs a prefetch; normally the generation service.
#[async_trait]
pub trait PrefetchHandler: Send + Sync {
    async fn prefetch(&self, class: ContentClass, item: &PoemRecord) -> Result<(), GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// 1a: narration of the current item.
    CurrentAudio,
    /// 1b: insight of the current item.
    CurrentInsight,
    /// 2: narration of the next item.
    NextAudio,
}

/// A trigger that has been scheduled but has not fired yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub fire_at: Instant,
    pub class: ContentClass,
    pub key: ContentId,
    pub priority: Priority,
}

/// Tasks belonging to one "current item". Cancelling the token cancels all of them.
struct ItemScope {
    item_id: String,
    token: CancellationToken,
    pending: Arc<Mutex<Vec<ScheduledTask>>>,
}

impl ItemScope {
    fn cancel(self) {
        self.token.cancel();
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!(
                "cancelled {} pending prefetch tasks for item {}",
                dropped.len(),
                self.item_id
            );
        }
    }
}

pub struct PrefetchScheduler {
    handler: Arc<dyn PrefetchHandler>,
    plan: PrefetchConfig,
    scope: Mutex<Option<ItemScope>>,
}

impl PrefetchScheduler {
    pub fn new(handler: Arc<dyn PrefetchHandler>, plan: PrefetchConfig) -> Self {
        Self {
            handler,
            plan,
            scope: Mutex::new(None),
        }
    }

    /// Switch the current item. Every task scheduled for the previous item
    /// is cancelled, then narration and insight for `current` and narration
    /// for `next` are scheduled relative to now. Re-selecting the item that
    /// is already current keeps its schedule.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_current_item(&self, current: PoemRecord, next: Option<PoemRecord>) {
        let mut scope = self.scope.lock();
        if scope.as_ref().map_or(false, |s| s.item_id == current.id) {
            debug!("item {} already current, keeping schedule", current.id);
            return;
        }
        if let Some(previous) = scope.take() {
            previous.cancel();
        }

        let active = ItemScope {
            item_id: current.id.clone(),
            token: CancellationToken::new(),
            pending: Arc::new(Mutex::new(Vec::new())),
        };
        let now = Instant::now();
        let current = Arc::new(current);

        self.schedule(
            &active,
            now + Duration::from_millis(self.plan.audio_delay_ms),
            None,
            ContentClass::Audio,
            Arc::clone(&current),
            Priority::CurrentAudio,
        );
        self.schedule(
            &active,
            now + Duration::from_millis(self.plan.insight_delay_ms),
            None,
            ContentClass::Insight,
            Arc::clone(&current),
            Priority::CurrentInsight,
        );
        if let Some(next) = next {
            self.schedule(
                &active,
                now + Duration::from_millis(self.plan.next_audio_delay_ms),
                Some(Duration::from_millis(self.plan.next_audio_stagger_ms)),
                ContentClass::Audio,
                Arc::new(next),
                Priority::NextAudio,
            );
        }

        debug!("prefetch scheduled for item {}", active.item_id);
        *scope = Some(active);
    }

    /// Cancel everything still pending, e.g. when leaving the browsing view.
    pub fn cancel_all(&self) {
        if let Some(previous) = self.scope.lock().take() {
            previous.cancel();
        }
    }

    pub fn current_item(&self) -> Option<String> {
        self.scope.lock().as_ref().map(|s| s.item_id.clone())
    }

    pub fn pending(&self) -> Vec<ScheduledTask> {
        self.scope
            .lock()
            .as_ref()
            .map(|s| s.pending.lock().clone())
            .unwrap_or_default()
    }

    fn schedule(
        &self,
        scope: &ItemScope,
        fire_at: Instant,
        stagger: Option<Duration>,
        class: ContentClass,
        item: Arc<PoemRecord>,
        priority: Priority,
    ) {
        let task = ScheduledTask {
            fire_at,
            class,
            key: item.content_id(),
            priority,
        };
        scope.pending.lock().push(task.clone());

        let token = scope.token.clone();
        let pending = Arc::clone(&scope.pending);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep_until(fire_at) => {}
            }
            if let Some(stagger) = stagger {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = sleep(stagger) => {}
                }
            }
            // Last check before any side effect: a cancel that raced the timer wins.
            if token.is_cancelled() {
                return;
            }
            pending.lock().retain(|t| t != &task);

            debug!("prefetch {:?} {}/{} firing", task.priority, task.class, task.key);
            if let Err(e) = handler.prefetch(task.class, &item).await {
                warn!(
                    "prefetch {:?} {}/{} failed: {}",
                    task.priority, task.class, task.key, e
                );
            }
        });
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl PrefetchHandler for NoopHandler {
        async fn prefetch(&self, _class: ContentClass, _item: &PoemRecord) -> Result<(), GenerationError> {
            Ok(())
        }
    }

    fn poem(id: &str) -> PoemRecord {
        PoemRecord {
            id: id.to_string(),
            poet: String::new(),
            poet_arabic: String::new(),
            title: String::new(),
            title_arabic: String::new(),
            arabic: String::new(),
            english: String::new(),
            tags: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_tasks_are_listed_in_priority_order() {
        let scheduler = PrefetchScheduler::new(Arc::new(NoopHandler), PrefetchConfig::default());
        scheduler.set_current_item(poem("a"), Some(poem("b")));

        let mut pending = scheduler.pending();
        pending.sort_by_key(|t| t.priority);
        let summary: Vec<_> = pending
            .iter()
            .map(|t| (t.priority, t.class, t.key.as_str().to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Priority::CurrentAudio, ContentClass::Audio, "a".to_string()),
                (Priority::CurrentInsight, ContentClass::Insight, "a".to_string()),
                (Priority::NextAudio, ContentClass::Audio, "b".to_string()),
            ]
        );

        scheduler.cancel_all();
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.current_item(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_tasks_leave_pending_list() {
        let scheduler = PrefetchScheduler::new(Arc::new(NoopHandler), PrefetchConfig::default());
        scheduler.set_current_item(poem("a"), None);
        assert_eq!(scheduler.pending().len(), 2);

        sleep(Duration::from_millis(2_100)).await;
        let left = scheduler.pending();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].priority, Priority::CurrentInsight);

        sleep(Duration::from_secs(5)).await;
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.current_item().as_deref(), Some("a"));
    }
}
