//! Process-wide keyed store shared by every script heap.
//!
//! Keys and values are ordered-serialization byte strings; because that
//! encoding is canonical, byte equality is semantic equality and the
//! compare-and-swap below never needs to decode anything. The table is
//! open-addressed with linear probing; removed entries leave tombstones so
//! probe chains stay intact, and tombstones are only reclaimed when the
//! table rehashes.
//!
//! A single coarse mutex serializes all operations. Every mutation
//! broadcasts a condition variable that [`wait`] blocks on. The first use
//! in a process starts a sweeper daemon that expires timed entries once a
//! second.

use crate::clock;
use crate::error::{Result, RuntimeError};
use crate::heap::{Heap, Value};
use crate::ordkey;
use parking_lot::{Condvar, Mutex};
use std::sync::OnceLock;
use std::time::Duration;

const MIN_CAPACITY: usize = 8;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Entry {
    key: Box<[u8]>,
    hash: u32,
    value: Box<[u8]>,
    /// Monotonic milliseconds; zero never expires.
    expiry: u64,
}

enum Slot {
    Empty,
    Tombstone,
    Full(Entry),
}

impl Slot {
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

struct Table {
    slots: Vec<Slot>,
    /// Live entries.
    len: usize,
    /// Live entries plus tombstones.
    used: usize,
}

impl Table {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            used: 0,
        }
    }

    fn lookup(&self, key: &[u8], hash: u32) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Full(e) if *e.key == *key => return Some(idx),
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    fn value(&self, idx: usize) -> &Entry {
        match &self.slots[idx] {
            Slot::Full(e) => e,
            _ => unreachable!("lookup returned a non-full slot"),
        }
    }

    /// Inserts, replaces or (with `value == None`) tombstones an entry.
    /// Returns the previous stored value.
    fn set(
        &mut self,
        key: Box<[u8]>,
        hash: u32,
        value: Option<Box<[u8]>>,
        expiry: u64,
    ) -> Option<Box<[u8]>> {
        if self.used * 4 >= self.slots.len() {
            let mut cap = self.slots.len();
            if self.len * 4 >= self.slots.len() {
                cap *= 2;
            }
            self.rehash(cap.max(MIN_CAPACITY));
        }

        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        let found = loop {
            match &self.slots[idx] {
                Slot::Full(e) if *e.key == *key => break true,
                Slot::Empty => break false,
                _ => idx = (idx + 1) & mask,
            }
        };

        if !found {
            if let Some(v) = value {
                self.slots[idx] = Slot::Full(Entry {
                    key,
                    hash,
                    value: v,
                    expiry,
                });
                self.len += 1;
                self.used += 1;
            }
            return None;
        }

        match value {
            Some(v) => match &mut self.slots[idx] {
                Slot::Full(e) => {
                    let old = std::mem::replace(&mut e.value, v);
                    e.expiry = expiry;
                    Some(old)
                }
                _ => unreachable!("probe found a non-full slot"),
            },
            None => {
                self.len -= 1;
                match std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
                    Slot::Full(e) => Some(e.value),
                    _ => unreachable!("probe found a non-full slot"),
                }
            }
        }
    }

    /// Probe-to-empty insert used by `rehash`; the fresh table holds no
    /// tombstones and no duplicate keys, and never resizes mid-build.
    fn insert_fresh(&mut self, entry: Entry) {
        let mask = self.slots.len() - 1;
        let mut idx = (entry.hash as usize) & mask;
        while !self.slots[idx].is_empty() {
            idx = (idx + 1) & mask;
        }
        self.slots[idx] = Slot::Full(entry);
        self.len += 1;
        self.used += 1;
    }

    fn rehash(&mut self, new_cap: usize) {
        let old = std::mem::take(&mut self.slots);
        self.slots.resize_with(new_cap, || Slot::Empty);
        self.len = 0;
        self.used = 0;
        for slot in old {
            if let Slot::Full(e) = slot {
                self.insert_fresh(e);
            }
        }
    }

    /// Tombstones entries past their expiry; returns how many went.
    fn sweep(&mut self, now: u64) -> usize {
        let mut expired = 0;
        for slot in &mut self.slots {
            if let Slot::Full(e) = slot {
                if e.expiry != 0 && now >= e.expiry {
                    *slot = Slot::Tombstone;
                    self.len -= 1;
                    expired += 1;
                }
            }
        }
        expired
    }
}

struct Store {
    table: Mutex<Table>,
    changed: Condvar,
}

fn store() -> &'static Store {
    static STORE: OnceLock<Store> = OnceLock::new();
    STORE.get_or_init(|| {
        std::thread::Builder::new()
            .name("bedrock-store-sweeper".into())
            .spawn(sweeper)
            .expect("can't start store sweeper thread");
        Store {
            table: Mutex::new(Table::new()),
            changed: Condvar::new(),
        }
    })
}

fn sweeper() {
    loop {
        std::thread::sleep(SWEEP_INTERVAL);
        let s = store();
        let expired = {
            let mut table = s.table.lock();
            table.sweep(clock::monotonic_time_ms())
        };
        if expired > 0 {
            tracing::debug!(expired, "store sweep expired entries");
        }
        s.changed.notify_all();
    }
}

fn key_hash(key: &[u8]) -> u32 {
    let folded = key
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    crate::util::jenkins_mix(folded)
}

fn expiry_for(timeout_ms: i32) -> Result<u64> {
    if timeout_ms < 0 {
        return Err(RuntimeError::invalid_argument("timeout must not be negative"));
    }
    if timeout_ms == 0 {
        Ok(0)
    } else {
        Ok(clock::monotonic_time_ms() + u64::from(timeout_ms as u32))
    }
}

// ----- raw byte-string operations -------------------------------------------

/// Copy of the stored value, if present.
pub fn get_raw(key: &[u8]) -> Option<Vec<u8>> {
    let hash = key_hash(key);
    let s = store();
    let table = s.table.lock();
    table
        .lookup(key, hash)
        .map(|idx| table.value(idx).value.to_vec())
}

/// Stores a value; `timeout_ms == 0` never expires.
pub fn set_raw(key: &[u8], value: &[u8], timeout_ms: i32) -> Result<()> {
    let expiry = expiry_for(timeout_ms)?;
    let hash = key_hash(key);
    let s = store();
    {
        let mut table = s.table.lock();
        table.set(key.into(), hash, Some(value.into()), expiry);
    }
    s.changed.notify_all();
    Ok(())
}

/// Removes a key if present.
pub fn remove_raw(key: &[u8]) {
    let hash = key_hash(key);
    let s = store();
    {
        let mut table = s.table.lock();
        table.set(key.into(), hash, None, 0);
    }
    s.changed.notify_all();
}

/// Atomic compare-and-swap. A missing key compares equal to the
/// serialization of integer zero. Returns the value stored before the
/// call (the swapped-out value on success, the conflicting value
/// otherwise).
pub fn cond_swap_raw(key: &[u8], expect: &[u8], new: &[u8], timeout_ms: i32) -> Result<Vec<u8>> {
    let expiry = expiry_for(timeout_ms)?;
    let hash = key_hash(key);
    let zero = ordkey::serialized_zero();
    let s = store();
    let (previous, swapped) = {
        let mut table = s.table.lock();
        let current: &[u8] = table
            .lookup(key, hash)
            .map_or(&zero[..], |idx| &table.value(idx).value);
        if current == expect {
            let old = table.set(key.into(), hash, Some(new.into()), expiry);
            (old.map_or_else(|| zero.clone(), Into::into), true)
        } else {
            (current.to_vec(), false)
        }
    };
    if swapped {
        s.changed.notify_all();
    }
    Ok(previous)
}

/// Blocks the caller until the stored value differs from `expect`;
/// `expect == ser(0)` matches the missing state.
pub fn wait_raw(key: &[u8], expect: &[u8]) {
    let hash = key_hash(key);
    let zero = ordkey::serialized_zero();
    let s = store();
    let mut table = s.table.lock();
    loop {
        let current: &[u8] = table
            .lookup(key, hash)
            .map_or(&zero[..], |idx| &table.value(idx).value);
        if current != expect {
            return;
        }
        s.changed.wait(&mut table);
    }
}

// ----- script-value wrappers ------------------------------------------------

/// Looks up a key; missing keys yield `null`.
pub fn get(heap: &mut Heap, key: Value) -> Result<Value> {
    let kb = ordkey::serialize(heap, key)?;
    match get_raw(&kb) {
        Some(vb) => ordkey::deserialize(heap, &vb),
        None => Ok(Value::NULL),
    }
}

/// Looks up a key; missing keys yield `default`.
pub fn get_or(heap: &mut Heap, key: Value, default: Value) -> Result<Value> {
    let kb = ordkey::serialize(heap, key)?;
    match get_raw(&kb) {
        Some(vb) => ordkey::deserialize(heap, &vb),
        None => Ok(default),
    }
}

/// Stores a key/value pair without expiry.
pub fn set(heap: &mut Heap, key: Value, value: Value) -> Result<()> {
    set_with_ttl(heap, key, value, 0)
}

/// Stores a key/value pair that expires `timeout_ms` from now.
pub fn set_with_ttl(heap: &mut Heap, key: Value, value: Value, timeout_ms: i32) -> Result<()> {
    let kb = ordkey::serialize(heap, key)?;
    let vb = ordkey::serialize(heap, value)?;
    set_raw(&kb, &vb, timeout_ms)
}

/// Removes a key.
pub fn remove(heap: &mut Heap, key: Value) -> Result<()> {
    let kb = ordkey::serialize(heap, key)?;
    remove_raw(&kb);
    Ok(())
}

/// Compare-and-swap on script values; see [`cond_swap_raw`].
pub fn cond_swap(heap: &mut Heap, key: Value, expect: Value, new: Value) -> Result<Value> {
    cond_swap_with_ttl(heap, key, expect, new, 0)
}

/// Compare-and-swap with an expiry applied when the swap succeeds.
pub fn cond_swap_with_ttl(
    heap: &mut Heap,
    key: Value,
    expect: Value,
    new: Value,
    timeout_ms: i32,
) -> Result<Value> {
    let kb = ordkey::serialize(heap, key)?;
    let eb = ordkey::serialize(heap, expect)?;
    let nb = ordkey::serialize(heap, new)?;
    let prev = cond_swap_raw(&kb, &eb, &nb, timeout_ms)?;
    ordkey::deserialize(heap, &prev)
}

/// Blocks until the value stored under `key` differs from `expect`.
pub fn wait(heap: &mut Heap, key: Value, expect: Value) -> Result<()> {
    let kb = ordkey::serialize(heap, key)?;
    let eb = ordkey::serialize(heap, expect)?;
    wait_raw(&kb, &eb);
    Ok(())
}
