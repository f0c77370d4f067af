//! The serialization point in front of the [`EventStore`].
//!
//! Writers queue on a single write lock, so no two mutations interleave.
//! Readers share a read lock and either compute in place or take a
//! point-in-time clone to work on after the lock is released.
//!
//! [`SharedStore::commit`] runs a follow-up closure while the write lock
//! is still held. The ingress layer uses it to recompute the aggregate and
//! publish to subscribers as part of the same unit as the mutation.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::store::{Applied, EventStore, Mutation, Rejection};

/// An [`EventStore`] behind a single read-write lock.
#[derive(Debug, Default)]
pub struct SharedStore {
    inner: RwLock<EventStore>,
}

impl SharedStore {
    /// Wrap an existing store.
    pub fn new(store: EventStore) -> Self {
        Self {
            inner: RwLock::new(store),
        }
    }

    /// Apply one mutation, then run `after` against the updated store
    /// before any other writer or reader can observe it.
    ///
    /// The commit instant is read once the write lock is held and passed
    /// to both the mutation and `after`. `after` is skipped when the
    /// mutation is rejected.
    pub async fn commit<R>(
        &self,
        mutation: Mutation,
        after: impl FnOnce(&EventStore, &Applied, DateTime<Utc>) -> R,
    ) -> Result<(Applied, R), Rejection> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let applied = guard.apply(mutation, now)?;
        let extra = after(&guard, &applied, now);
        Ok((applied, extra))
    }

    /// Run `f` against a consistent view of the store.
    pub async fn read<R>(&self, f: impl FnOnce(&EventStore) -> R) -> R {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// A point-in-time copy, independent of later mutations.
    pub async fn snapshot(&self) -> EventStore {
        self.inner.read().await.clone()
    }

    /// Replace the whole store, then run `after` against the new contents
    /// under the same write lock.
    pub async fn replace<R>(&self, store: EventStore, after: impl FnOnce(&EventStore) -> R) -> R {
        let mut guard = self.inner.write().await;
        *guard = store;
        after(&guard)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{NewConsumption, NewItem};

    fn beer() -> Mutation {
        Mutation::AddItem(NewItem {
            name: "Beer".to_owned(),
            emoji: None,
            image_ref: None,
            color: None,
        })
    }

    fn drink() -> Mutation {
        Mutation::AddConsumption(NewConsumption {
            item_name: "beer".to_owned(),
            participant_id: None,
            occurred_at: None,
        })
    }

    #[tokio::test]
    async fn after_hook_sees_the_committed_mutation() {
        let shared = SharedStore::default();
        let (_, items) = shared
            .commit(beer(), |store, _, _| store.items().len())
            .await
            .unwrap();
        assert_eq!(items, 1);
    }

    #[tokio::test]
    async fn rejected_mutation_skips_after_hook() {
        let shared = SharedStore::default();
        let mut ran = false;
        let result = shared
            .commit(drink(), |_, _, _| {
                ran = true;
            })
            .await;
        assert!(result.is_err());
        assert!(!ran);
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() {
        let shared = Arc::new(SharedStore::default());
        shared.commit(beer(), |_, _, _| ()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                shared
                    .commit(drink(), |store, _, _| store.consumptions().len())
                    .await
                    .unwrap()
                    .1
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn commit_time_is_taken_after_waiting_for_the_lock() {
        let shared = Arc::new(SharedStore::default());
        shared.commit(beer(), |_, _, _| ()).await.unwrap();

        let held = shared.inner.write().await;
        let writer = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                shared.commit(drink(), |_, _, now| now).await.unwrap()
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let released_at = Utc::now();
        drop(held);

        let (applied, now) = writer.await.unwrap();
        assert!(now >= released_at);
        let Applied::ConsumptionAdded(record) = applied else {
            panic!("expected a consumption, got {applied:?}");
        };
        assert_eq!(record.occurred_at, now);
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_writes() {
        let shared = SharedStore::default();
        shared.commit(beer(), |_, _, _| ()).await.unwrap();
        let copy = shared.snapshot().await;
        shared.commit(drink(), |_, _, _| ()).await.unwrap();
        assert!(copy.consumptions().is_empty());
        assert_eq!(shared.read(|s| s.consumptions().len()).await, 1);
    }

    #[tokio::test]
    async fn replace_swaps_everything() {
        let shared = SharedStore::default();
        shared.commit(beer(), |_, _, _| ()).await.unwrap();
        let count = shared
            .replace(EventStore::new(), |s| s.items().len())
            .await;
        assert_eq!(count, 0);
    }
}
