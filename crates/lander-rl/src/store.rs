//! Concurrent value-function store
//!
//! Dense tables keep one lock per slot. Sparse tables are striped into a
//! fixed number of shards, each a locked map, and a slot's lock is the lock
//! of shard `index % shards`.
//!
//! Batch updates follow a two-phase protocol: while holding the coarse table
//! lock, take the lock of every distinct slot (or shard) the batch touches,
//! in ascending order; then release the table lock and apply the writes. The
//! table lock orders the "who locks what" step between batches, and single
//! slot updates never wait on more than one lock, so no interleaving can
//! deadlock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use lander_core::{LanderError, Result};

use crate::index::{Backing, IndexLayout};
use crate::table_snapshot::{TableEntries, TableSnapshot};

/// Default number of shards of a sparse table.
pub const DEFAULT_SPARSE_SHARDS: usize = 64;

enum Slots {
    Dense(Box<[Mutex<f32>]>),
    Sparse(Box<[Mutex<HashMap<u64, f32>>]>),
}

/// Learned values of one definition, shared by every episode.
pub struct ValueStore {
    name: String,
    size: u64,
    table_lock: Mutex<()>,
    slots: Slots,
}

impl std::fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStore")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("backing", &self.backing())
            .finish_non_exhaustive()
    }
}

impl ValueStore {
    /// Allocate an all-zero table shaped like `layout`.
    pub fn new(name: impl Into<String>, layout: &IndexLayout, sparse_shards: usize) -> Self {
        let name = name.into();
        let size = layout.total();
        let slots = match layout.backing() {
            Backing::Dense => Slots::Dense((0..size).map(|_| Mutex::new(0.0)).collect()),
            Backing::Sparse => {
                Slots::Sparse((0..sparse_shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect())
            }
        };
        info!(mdp = %name, size, backing = %layout.backing(), "Value table allocated");
        Self {
            name,
            size,
            table_lock: Mutex::new(()),
            slots,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the address space.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn backing(&self) -> Backing {
        match self.slots {
            Slots::Dense(_) => Backing::Dense,
            Slots::Sparse(_) => Backing::Sparse,
        }
    }

    fn check(&self, index: u64) -> Result<()> {
        if index < self.size {
            Ok(())
        } else {
            Err(LanderError::IndexOutOfRange { index, size: self.size })
        }
    }

    fn shard_of(shards: &[Mutex<HashMap<u64, f32>>], index: u64) -> usize {
        (index % shards.len() as u64) as usize
    }

    /// Value at `index`; unvisited entries read 0.
    pub fn get(&self, index: u64) -> Result<f32> {
        self.check(index)?;
        Ok(match &self.slots {
            Slots::Dense(slots) => *slots[index as usize].lock(),
            Slots::Sparse(shards) => shards[Self::shard_of(shards, index)]
                .lock()
                .get(&index)
                .copied()
                .unwrap_or(0.0),
        })
    }

    pub fn put(&self, index: u64, value: f32) -> Result<()> {
        self.update(index, |_| value).map(|_| ())
    }

    /// Read-modify-write under the entry's own lock. Returns the new value.
    pub fn update(&self, index: u64, f: impl FnOnce(f32) -> f32) -> Result<f32> {
        self.check(index)?;
        Ok(match &self.slots {
            Slots::Dense(slots) => {
                let mut slot = slots[index as usize].lock();
                *slot = f(*slot);
                *slot
            }
            Slots::Sparse(shards) => {
                let mut shard = shards[Self::shard_of(shards, index)].lock();
                let entry = shard.entry(index).or_insert(0.0);
                *entry = f(*entry);
                *entry
            }
        })
    }

    /// Lock every entry in `indices` for one batch of reads and writes.
    ///
    /// Repeated indices are locked once. All indices are validated before any
    /// lock is taken.
    pub fn batch(&self, indices: &[u64]) -> Result<BatchGuard<'_>> {
        for &index in indices {
            self.check(index)?;
        }
        let members: BTreeSet<u64> = indices.iter().copied().collect();

        let table = self.table_lock.lock();
        let guards = match &self.slots {
            Slots::Dense(slots) => BatchGuards::Dense(
                members
                    .iter()
                    .map(|&index| (index, slots[index as usize].lock()))
                    .collect(),
            ),
            Slots::Sparse(shards) => {
                let wanted: BTreeSet<usize> = members.iter().map(|&i| Self::shard_of(shards, i)).collect();
                BatchGuards::Sparse {
                    shards: shards.len() as u64,
                    guards: wanted.into_iter().map(|shard| (shard, shards[shard].lock())).collect(),
                }
            }
        };
        drop(table);

        Ok(BatchGuard {
            members,
            guards,
        })
    }

    /// Entries holding a non-zero value (dense) or ever written (sparse).
    pub fn populated(&self) -> u64 {
        match &self.slots {
            Slots::Dense(slots) => slots.iter().filter(|slot| *slot.lock() != 0.0).count() as u64,
            Slots::Sparse(shards) => shards.iter().map(|shard| shard.lock().len() as u64).sum(),
        }
    }

    /// Copy the table for the persistence collaborator.
    pub fn export(&self) -> TableSnapshot {
        let entries = match &self.slots {
            Slots::Dense(slots) => TableEntries::Dense(slots.iter().map(|slot| *slot.lock()).collect()),
            Slots::Sparse(shards) => {
                let mut pairs: Vec<(u64, f32)> = shards
                    .iter()
                    .flat_map(|shard| shard.lock().iter().map(|(i, v)| (*i, *v)).collect::<Vec<_>>())
                    .collect();
                pairs.sort_unstable_by_key(|(index, _)| *index);
                TableEntries::Sparse(pairs)
            }
        };
        TableSnapshot::new(self.name.clone(), self.size, self.backing(), entries)
    }

    /// Overwrite the table with a same-shaped snapshot.
    ///
    /// A dense snapshot may be attached to a sparse table and vice versa;
    /// only the definition name, format version and size must match.
    pub fn import(&self, snapshot: &TableSnapshot) -> Result<()> {
        snapshot.check_shape(&self.name, self.size)?;

        let _table = self.table_lock.lock();
        match &self.slots {
            Slots::Dense(slots) => {
                for slot in slots.iter() {
                    *slot.lock() = 0.0;
                }
                for (index, value) in snapshot.iter() {
                    *slots[index as usize].lock() = value;
                }
            }
            Slots::Sparse(shards) => {
                for shard in shards.iter() {
                    shard.lock().clear();
                }
                for (index, value) in snapshot.iter().filter(|(_, v)| *v != 0.0) {
                    shards[Self::shard_of(shards, index)].lock().insert(index, value);
                }
            }
        }
        info!(mdp = %self.name, entries = snapshot.entries.len(), "Value table attached");
        Ok(())
    }
}

enum BatchGuards<'a> {
    Dense(BTreeMap<u64, MutexGuard<'a, f32>>),
    Sparse {
        shards: u64,
        guards: BTreeMap<usize, MutexGuard<'a, HashMap<u64, f32>>>,
    },
}

/// Exclusive access to the entries of one batch; dropping it releases them.
pub struct BatchGuard<'a> {
    members: BTreeSet<u64>,
    guards: BatchGuards<'a>,
}

impl BatchGuard<'_> {
    pub fn indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.members.iter().copied()
    }

    /// Value of a locked entry, `None` when `index` is not part of the batch.
    pub fn get(&self, index: u64) -> Option<f32> {
        if !self.members.contains(&index) {
            return None;
        }
        match &self.guards {
            BatchGuards::Dense(guards) => guards.get(&index).map(|slot| **slot),
            BatchGuards::Sparse { shards, guards } => {
                let shard = (index % *shards) as usize;
                guards
                    .get(&shard)
                    .map(|map| map.get(&index).copied().unwrap_or(0.0))
            }
        }
    }

    /// Write a locked entry. Returns `false` when `index` is not part of the batch.
    pub fn set(&mut self, index: u64, value: f32) -> bool {
        if !self.members.contains(&index) {
            return false;
        }
        match &mut self.guards {
            BatchGuards::Dense(guards) => match guards.get_mut(&index) {
                Some(slot) => {
                    **slot = value;
                    true
                }
                None => false,
            },
            BatchGuards::Sparse { shards, guards } => {
                let shard = (index % *shards) as usize;
                match guards.get_mut(&shard) {
                    Some(map) => {
                        map.insert(index, value);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}
