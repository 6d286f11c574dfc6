use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use fr_core::actor::ActorState;
use fr_core::model::RuleInstance;

#[derive(Default)]
struct Arena {
    actors: HashMap<String, ActorState>,
    leased: HashSet<String>,
}

/// Arena of actor states keyed by rule-instance id.
///
/// A pass leases every actor it will advance, all or nothing, and owns them
/// until the lease is released. Two passes therefore never advance the same
/// actor concurrently, while passes over disjoint actors run side by side.
#[derive(Default)]
pub struct ActorStore {
    arena: Mutex<Arena>,
    released: Notify,
}

impl ActorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the actors of `instances`, waiting while any of them is held by
    /// another pass. Missing actors are created, and so reserved, here.
    pub async fn lease(self: &Arc<Self>, instances: &[Arc<RuleInstance>]) -> ActorLease {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(actors) = self.try_take(instances) {
                return ActorLease {
                    store: Arc::clone(self),
                    ids: instances.iter().map(|i| i.id.clone()).collect(),
                    actors,
                };
            }
            fr_debug!(pipe, actors = instances.len(), "actor lease contended, waiting");
            notified.await;
        }
    }

    /// [`lease`](Self::lease) that gives up when `cancel` fires first.
    /// Nothing is reserved when it returns `None`.
    pub async fn lease_or_cancel(
        self: &Arc<Self>,
        instances: &[Arc<RuleInstance>],
        cancel: &CancellationToken,
    ) -> Option<ActorLease> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            lease = self.lease(instances) => Some(lease),
        }
    }

    fn try_take(&self, instances: &[Arc<RuleInstance>]) -> Option<BTreeMap<String, ActorState>> {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        if instances.iter().any(|i| arena.leased.contains(&i.id)) {
            return None;
        }
        let mut taken = BTreeMap::new();
        for inst in instances {
            arena.leased.insert(inst.id.clone());
            let mut actor = arena
                .actors
                .remove(&inst.id)
                .unwrap_or_else(|| ActorState::new(inst));
            actor.sync_bindings(inst);
            taken.insert(inst.id.clone(), actor);
        }
        Some(taken)
    }

    fn give_back(&self, ids: &[String], actors: BTreeMap<String, ActorState>) {
        {
            let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
            for id in ids {
                arena.leased.remove(id);
            }
            for (id, actor) in actors {
                arena.actors.insert(id, actor);
            }
        }
        self.released.notify_waiters();
    }

    /// Copies of the idle actors among `ids` (all when `None`). Leased
    /// actors are skipped; their pass persists them on release.
    pub fn snapshot(&self, ids: Option<&[String]>) -> Vec<ActorState> {
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<ActorState> = match ids {
            Some(ids) => ids.iter().filter_map(|id| arena.actors.get(id).cloned()).collect(),
            None => arena.actors.values().cloned().collect(),
        };
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn restore(&self, actors: Vec<ActorState>) {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        for actor in actors {
            arena.actors.insert(actor.id.clone(), actor);
        }
    }

    /// Drop the actors of `instances`, waiting for any pass holding them.
    pub async fn remove(self: &Arc<Self>, instances: &[Arc<RuleInstance>]) -> usize {
        let mut lease = self.lease(instances).await;
        let removed = lease.take_all().len();
        lease.release();
        removed
    }

    /// Drop idle actors whose id is not in `keep`. Returns the dropped ids.
    pub fn retain(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<String> = arena
            .actors
            .keys()
            .filter(|id| !keep.contains(*id) && !arena.leased.contains(*id))
            .cloned()
            .collect();
        for id in &doomed {
            arena.actors.remove(id);
        }
        doomed
    }

    pub fn get(&self, id: &str) -> Option<ActorState> {
        self.arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actors
            .get(id)
            .cloned()
    }

    /// Stored plus leased actors.
    pub fn len(&self) -> usize {
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        arena.actors.len() + arena.leased.iter().filter(|id| !arena.actors.contains_key(*id)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest instant any idle actor has evaluated.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actors
            .values()
            .filter_map(|a| a.last_evaluated)
            .max()
    }
}

// ---------------------------------------------------------------------------
// ActorLease
// ---------------------------------------------------------------------------

/// Exclusive hold on a set of actors. Dropping the lease returns whatever
/// actors it still holds; ids whose actor was taken and not put back are
/// released without an actor and are recreated on next use.
pub struct ActorLease {
    store: Arc<ActorStore>,
    ids: Vec<String>,
    actors: BTreeMap<String, ActorState>,
}

impl ActorLease {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, id: &str) -> Option<&ActorState> {
        self.actors.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ActorState> {
        self.actors.get_mut(id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &ActorState> {
        self.actors.values()
    }

    /// Move the actors out, e.g. to hand them to workers.
    pub fn take_all(&mut self) -> BTreeMap<String, ActorState> {
        std::mem::take(&mut self.actors)
    }

    /// Put actors back after the workers finish. Ids outside the lease are
    /// ignored.
    pub fn put_back(&mut self, actors: impl IntoIterator<Item = ActorState>) {
        for actor in actors {
            if self.ids.contains(&actor.id) {
                self.actors.insert(actor.id.clone(), actor);
            }
        }
    }

    /// Replace `id` with a fresh actor for `instance`.
    pub fn reset(&mut self, instance: &RuleInstance) {
        self.actors
            .insert(instance.id.clone(), ActorState::new(instance));
    }

    pub fn release(self) {
        // Drop does the work
    }
}

impl Drop for ActorLease {
    fn drop(&mut self) {
        let actors = std::mem::take(&mut self.actors);
        let missing = self.ids.iter().filter(|id| !actors.contains_key(*id)).count();
        if missing > 0 && !self.ids.is_empty() {
            fr_debug!(pipe, missing, "lease released without some actors");
        }
        let ids = std::mem::take(&mut self.ids);
        self.store.give_back(&ids, actors);
    }
}
