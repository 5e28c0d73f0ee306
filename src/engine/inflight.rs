// Registry of generations in progress, one completion channel per (class, key).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::GenerationError;
use crate::model::{ContentClass, ContentId, Payload};

pub type Outcome = Result<Payload, GenerationError>;

/// One generation in progress. Completion is published once through a
/// watch channel that every waiter subscribes to.
pub struct InFlight {
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
}

impl InFlight {
    fn new(id: u64) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Outcome>> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, outcome: Outcome) {
        self.tx.send_replace(Some(outcome));
    }
}

/// Result of an atomic check-and-add on the registry.
pub enum Claim {
    /// The caller registered the entry and must run the generator.
    Leader(Arc<InFlight>),
    /// Someone else is generating; wait on this entry.
    Waiter(Arc<InFlight>),
}

#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<(ContentClass, ContentId), Arc<InFlight>>>,
    next_id: AtomicU64,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the generator for `(class, key)` unless one is already registered.
    pub fn claim(&self, class: ContentClass, key: &ContentId) -> Claim {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&(class, key.clone())) {
            return Claim::Waiter(Arc::clone(existing));
        }
        let entry = Arc::new(InFlight::new(self.next_id.fetch_add(1, Ordering::Relaxed)));
        entries.insert((class, key.clone()), Arc::clone(&entry));
        Claim::Leader(entry)
    }

    /// Replace `stale` with a fresh entry if it is still the registered one
    /// (or nothing is registered). If a different generation has taken its
    /// place, wait on that one instead.
    pub fn take_over(&self, class: ContentClass, key: &ContentId, stale: &Arc<InFlight>) -> Claim {
        let mut entries = self.entries.lock();
        match entries.get(&(class, key.clone())) {
            Some(current) if !Arc::ptr_eq(current, stale) => Claim::Waiter(Arc::clone(current)),
            _ => {
                let entry = Arc::new(InFlight::new(self.next_id.fetch_add(1, Ordering::Relaxed)));
                entries.insert((class, key.clone()), Arc::clone(&entry));
                Claim::Leader(entry)
            }
        }
    }

    /// Remove `entry` if it is still the registered generation for `(class, key)`.
    pub fn release(&self, class: ContentClass, key: &ContentId, entry: &Arc<InFlight>) {
        let mut entries = self.entries.lock();
        let k = (class, key.clone());
        if entries.get(&k).map_or(false, |current| Arc::ptr_eq(current, entry)) {
            entries.remove(&k);
        }
    }

    pub fn contains(&self, class: ContentClass, key: &ContentId) -> bool {
        self.entries.lock().contains_key(&(class, key.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_waits() {
        let reg = InFlightRegistry::new();
        let key = ContentId::from("k");

        let Claim::Leader(first) = reg.claim(ContentClass::Audio, &key) else {
            panic!("first claim must lead");
        };
        let Claim::Waiter(seen) = reg.claim(ContentClass::Audio, &key) else {
            panic!("second claim must wait");
        };
        assert!(Arc::ptr_eq(&first, &seen));

        // Classes are independent.
        assert!(matches!(reg.claim(ContentClass::Insight, &key), Claim::Leader(_)));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_stale_release_keeps_replacement() {
        let reg = InFlightRegistry::new();
        let key = ContentId::from("k");

        let Claim::Leader(stale) = reg.claim(ContentClass::Audio, &key) else {
            panic!("expected leader");
        };
        let Claim::Leader(fresh) = reg.take_over(ContentClass::Audio, &key, &stale) else {
            panic!("take over of the stale entry must lead");
        };
        assert_ne!(stale.id(), fresh.id());

        // A second waiter that also saw the stale entry joins the replacement.
        let Claim::Waiter(joined) = reg.take_over(ContentClass::Audio, &key, &stale) else {
            panic!("expected waiter");
        };
        assert!(Arc::ptr_eq(&joined, &fresh));

        reg.release(ContentClass::Audio, &key, &stale);
        assert!(reg.contains(ContentClass::Audio, &key));

        reg.release(ContentClass::Audio, &key, &fresh);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_late_subscriber() {
        let entry = InFlight::new(0);
        entry.publish(Ok(Payload::Text("done".into())));

        let mut rx = entry.subscribe();
        let got = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert_eq!(got, Some(Ok(Payload::Text("done".into()))));
    }
}
