//! Weak, identity-stable index of live observables.
//!
//! The index is a generation-tagged arena. A slot holds a weak handle to an
//! instance; the identity handed out is `(slot, generation)`, and the slot's
//! generation is bumped whenever its entry is retired. A stale identity
//! therefore resolves to nothing, never to whatever occupies the slot next.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{ObjectKey, Observable, WeakObservable};

/// Stable address of an object in patches and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u64);

impl Identity {
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn slot(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot(), self.generation())
    }
}

struct Entry {
    key: ObjectKey,
    object: WeakObservable,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: HashMap<ObjectKey, Identity>,
}

impl Arena {
    fn live(&self, identity: Identity) -> Option<&Entry> {
        let slot = self.slots.get(identity.slot() as usize)?;
        if slot.generation != identity.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Empties the slot behind `identity` and retires its generation.
    fn retire(&mut self, identity: Identity) -> Option<ObjectKey> {
        let slot = self.slots.get_mut(identity.slot() as usize)?;
        if slot.generation != identity.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(identity.slot());
        self.by_key.remove(&entry.key);
        Some(entry.key)
    }

    fn allocate(&mut self) -> u32 {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.slots.push(Slot::default());
        (self.slots.len() - 1) as u32
    }
}

/// Maps identities to weakly held observables.
///
/// All operations go through one lock, so `register` and `resolve` are
/// linearizable: a resolver sees either no entry or a fully installed one.
#[derive(Default)]
pub struct IdentityIndex {
    arena: RwLock<Arena>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identity of `object`, assigning one on first sight.
    pub fn register(&self, object: &Observable) -> Identity {
        let key = object.key();
        if let Some(identity) = self.arena.read().by_key.get(&key) {
            return *identity;
        }

        let mut arena = self.arena.write();
        if let Some(identity) = arena.by_key.get(&key) {
            return *identity;
        }
        let slot = arena.allocate();
        let generation = arena.slots[slot as usize].generation;
        arena.slots[slot as usize].entry = Some(Entry {
            key,
            object: object.downgrade(),
        });
        let identity = Identity::new(slot, generation);
        arena.by_key.insert(key, identity);
        tracing::trace!(identity = %identity, object = %key, "Registered object");
        identity
    }

    /// Resolves `identity` to its live instance.
    ///
    /// An entry whose instance has been dropped is removed on the way out.
    pub fn resolve(&self, identity: Identity) -> Option<Observable> {
        {
            let arena = self.arena.read();
            let entry = arena.live(identity)?;
            if let Some(object) = entry.object.upgrade() {
                return Some(object);
            }
        }

        let mut arena = self.arena.write();
        let dead = arena
            .live(identity)
            .is_some_and(|entry| !entry.object.is_alive());
        if dead {
            arena.retire(identity);
            tracing::trace!(identity = %identity, "Dropped stale entry");
        }
        None
    }

    /// Retires `identity`. Returns `false` when it was already unknown.
    pub fn forget(&self, identity: Identity) -> bool {
        self.arena.write().retire(identity).is_some()
    }

    pub fn forget_key(&self, key: ObjectKey) -> Option<Identity> {
        let mut arena = self.arena.write();
        let identity = *arena.by_key.get(&key)?;
        arena.retire(identity);
        Some(identity)
    }

    pub fn identity_of(&self, object: &Observable) -> Option<Identity> {
        self.identity_of_key(object.key())
    }

    pub fn identity_of_key(&self, key: ObjectKey) -> Option<Identity> {
        self.arena.read().by_key.get(&key).copied()
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.arena.read().live(identity).is_some()
    }

    /// Installs `object` at an identity chosen by the peer that created it.
    ///
    /// Used on the receiving side, where identities come from patches rather
    /// than from local registration. Whatever occupied the slot is displaced.
    pub fn adopt(&self, identity: Identity, object: &Observable) {
        let mut arena = self.arena.write();
        if let Some(previous) = arena.by_key.get(&object.key()).copied() {
            if previous != identity {
                arena.retire(previous);
            }
        }

        let slot = identity.slot() as usize;
        while arena.slots.len() <= slot {
            let fresh = arena.slots.len() as u32;
            arena.slots.push(Slot::default());
            if fresh as usize != slot {
                arena.free.push(fresh);
            }
        }
        arena.free.retain(|s| *s as usize != slot);

        if let Some(old) = arena.slots[slot].entry.take() {
            arena.by_key.remove(&old.key);
            if old.key != object.key() {
                tracing::debug!(identity = %identity, "Adopt displaced an existing entry");
            }
        }
        arena.slots[slot] = Slot {
            generation: identity.generation(),
            entry: Some(Entry {
                key: object.key(),
                object: object.downgrade(),
            }),
        };
        arena.by_key.insert(object.key(), identity);
    }

    /// Eagerly removes every entry whose instance has been dropped.
    pub fn sweep(&self) -> usize {
        let mut arena = self.arena.write();
        let dead: Vec<Identity> = arena
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| match &s.entry {
                Some(entry) if !entry.object.is_alive() => {
                    Some(Identity::new(slot as u32, s.generation))
                }
                _ => None,
            })
            .collect();
        for identity in &dead {
            arena.retire(*identity);
        }
        if !dead.is_empty() {
            tracing::debug!(removed = dead.len(), "Swept identity index");
        }
        dead.len()
    }

    /// Number of occupied entries, including dead ones not yet swept.
    pub fn len(&self) -> usize {
        self.arena.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for IdentityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.read();
        f.debug_struct("IdentityIndex")
            .field("entries", &arena.by_key.len())
            .field("slots", &arena.slots.len())
            .finish()
    }
}
