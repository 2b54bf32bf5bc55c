//! Striped per-address locks

use casnode_common::Address;
use parking_lot::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 256;

/// Fixed table of mutexes indexed by address hash
///
/// Two addresses may share a stripe. Callers hold at most one stripe at a
/// time, so sharing can delay but never deadlock.
pub struct AddressLocks {
    stripes: Box<[Mutex<()>]>,
}

impl AddressLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, address: &Address) -> usize {
        let hash = xxhash_rust::xxh64::xxh64(&address.to_key_bytes(), 0);
        (hash % self.stripes.len() as u64) as usize
    }

    /// Block until `address` is free and hold it for the guard's lifetime
    pub fn lock(&self, address: &Address) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(address)].lock()
    }
}

impl Default for AddressLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
