/*
 * Copyright 2021 Luca Fulchir <luker@fenrirproject.org>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The coordinator: ties the directory, Window LRU, SLRU, CM4 and
//! doorkeeper together into the TinyLFU admission rule.

use std::hash::{BuildHasher, Hash, Hasher};

use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::HashMap;

use crate::doorkeeper::Doorkeeper;
use crate::entry::{Entry, Segment};
use crate::error::Error;
use crate::list::NodeRef;
use crate::sizer::Sizer;
use crate::sketch::Cm4;
use crate::slru::{Hit, Slru};
use crate::window::Window;

const DOORKEEPER_FALSE_POSITIVE_RATE: f64 = 0.01;
const DEFAULT_LRU_PCT: f32 = 1.0;
const DEFAULT_SIZER_STEP: u64 = 10_000;
const REBALANCE_MIGRATION_CAP: usize = 1000;

/// Construction-time configuration. `size` and `samples` are mandatory;
/// everything else has a default matching spec.md's stated defaults
/// (adaptive sizing off, no callbacks, process-seeded hasher).
pub struct CacheBuilder<K, V, S = DefaultHashBuilder> {
    size: usize,
    samples: usize,
    hasher: S,
    on_evict: Option<Box<dyn FnMut(K, V)>>,
    on_replace: Option<Box<dyn FnMut(K, V)>>,
    adaptive: bool,
}

impl<K, V> CacheBuilder<K, V, DefaultHashBuilder> {
    pub fn new(size: usize, samples: usize) -> Self {
        CacheBuilder {
            size,
            samples,
            hasher: DefaultHashBuilder::default(),
            on_evict: None,
            on_replace: None,
            adaptive: false,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S> {
    /// Swap in a caller-supplied hasher, the Rust-idiomatic stand-in for
    /// spec.md §6/§4.8's caller-supplied `hash: K -> u64`.
    pub fn hasher<S2: BuildHasher>(self, hasher: S2) -> CacheBuilder<K, V, S2> {
        CacheBuilder {
            size: self.size,
            samples: self.samples,
            hasher,
            on_evict: self.on_evict,
            on_replace: self.on_replace,
            adaptive: self.adaptive,
        }
    }

    pub fn on_evict<F: FnMut(K, V) + 'static>(mut self, f: F) -> Self {
        self.on_evict = Some(Box::new(f));
        self
    }

    pub fn on_replace<F: FnMut(K, V) + 'static>(mut self, f: F) -> Self {
        self.on_replace = Some(Box::new(f));
        self
    }

    /// Enable the adaptive sizer (spec.md §4.7). Off by default: the
    /// hill-climb is heuristic and produces observable oscillation under
    /// stationary workloads, so reproducible callers should opt in
    /// explicitly.
    pub fn adaptive(mut self, enabled: bool) -> Self {
        self.adaptive = enabled;
        self
    }

    pub fn try_build(self) -> Result<Cache<K, V, S>, Error>
    where
        K: Hash + Eq + Clone,
        S: BuildHasher,
    {
        if self.size == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.samples == 0 {
            return Err(Error::ZeroSampleWindow);
        }
        Ok(Cache::from_builder(self))
    }

    pub fn build(self) -> Cache<K, V, S>
    where
        K: Hash + Eq + Clone,
        S: BuildHasher,
    {
        self.try_build().expect("invalid cache configuration")
    }
}

/// A fixed-capacity, single-owner cache implementing W-TinyLFU admission.
///
/// Not `Send`/`Sync` by omission -- per spec.md §5 the core performs no
/// internal synchronization; callers serialize access externally (a single
/// mutex wrapping every entrypoint is the recommended composition).
pub struct Cache<K, V, S = DefaultHashBuilder> {
    directory: HashMap<K, NodeRef<Entry<K, V>>, S>,
    window: Window<K, V>,
    slru: Slru<K, V>,
    cm4: Cm4,
    doorkeeper: Doorkeeper,
    samples: usize,
    w: usize,
    on_evict: Option<Box<dyn FnMut(K, V)>>,
    on_replace: Option<Box<dyn FnMut(K, V)>>,
    sizer: Option<Sizer>,
    size: usize,
}

impl<K: Hash + Eq + Clone, V> Cache<K, V, DefaultHashBuilder> {
    /// Convenience constructor equivalent to `CacheBuilder::new(size,
    /// samples).build()`.
    pub fn new(size: usize, samples: usize) -> Self {
        CacheBuilder::new(size, samples).build()
    }
}

impl<K: Hash + Eq + Clone, V, S: BuildHasher> Cache<K, V, S> {
    fn from_builder(builder: CacheBuilder<K, V, S>) -> Self {
        let size = builder.size;
        let (w_cap, a1_cap, a2_cap) = caps_for_pct(size, DEFAULT_LRU_PCT);
        let sizer = if builder.adaptive {
            Some(Sizer::new(DEFAULT_LRU_PCT, DEFAULT_SIZER_STEP))
        } else {
            None
        };
        Cache {
            directory: HashMap::with_hasher(builder.hasher),
            window: Window::new(w_cap),
            slru: Slru::new(a1_cap, a2_cap),
            cm4: Cm4::new(size),
            doorkeeper: Doorkeeper::new(builder.samples, DOORKEEPER_FALSE_POSITIVE_RATE),
            samples: builder.samples,
            w: 0,
            on_evict: builder.on_evict,
            on_replace: builder.on_replace,
            sizer,
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window.cap() + self.slru.cap()
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = self.directory.hasher().build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn advance_epoch(&mut self) {
        self.w += 1;
        if self.w >= self.samples {
            self.cm4.reset();
            self.doorkeeper.reset();
            self.w = 0;
            log::trace!("epoch rollover: cm4 halved, doorkeeper cleared");
        }
    }

    /// `Get` (spec.md §4.6): returns the value and whether it was a hit.
    pub fn get_with_hit(&mut self, key: &K) -> (Option<&V>, bool) {
        self.advance_epoch();
        let node = match self.directory.get(key).copied() {
            None => {
                let h = self.hash_key(key);
                self.cm4.add(h);
                if let Some(sizer) = self.sizer.as_mut() {
                    sizer.record(false);
                }
                return (None, false);
            }
            Some(node) => node,
        };
        let (keyh, segment) = unsafe {
            let entry: &Entry<K, V> = node.payload();
            (entry.keyh, entry.segment)
        };
        self.cm4.add(keyh);
        self.touch(key, node, segment);
        if let Some(sizer) = self.sizer.as_mut() {
            sizer.record(true);
        }
        let node = *self
            .directory
            .get(key)
            .expect("key just touched must still be resident");
        let value = unsafe { &node.payload().value };
        (Some(value), true)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_with_hit(key).0
    }

    /// `Add` (spec.md §4.6).
    pub fn add(&mut self, key: K, value: V) {
        self.advance_epoch();
        if let Some(node) = self.directory.get(&key).copied() {
            let old_value = unsafe {
                let entry = node.payload_mut();
                std::mem::replace(&mut entry.value, value)
            };
            let (keyh, segment) = unsafe {
                let entry: &Entry<K, V> = node.payload();
                (entry.keyh, entry.segment)
            };
            self.cm4.add(keyh);
            self.touch(&key, node, segment);
            if let Some(cb) = self.on_replace.as_mut() {
                cb(key, old_value);
            }
            self.maybe_adapt();
            return;
        }

        let keyh = self.hash_key(&key);
        let entry = Entry {
            key: key.clone(),
            value,
            keyh,
            segment: Segment::Window,
        };
        let (node, evicted) = self.window.add(entry);
        self.directory.insert(key, node);
        if let Some(old) = evicted {
            self.directory.remove(&old.key);
            self.offer_to_slru(old);
        }
        self.maybe_adapt();
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let node = self.directory.remove(key)?;
        let segment = unsafe { node.payload().segment };
        let entry = match segment {
            Segment::Window => self.window.remove(node),
            Segment::Probation | Segment::Protected => self.slru.remove(node, segment),
        };
        Some(entry.value)
    }

    /// Reorder a resident node within its owning list on a hit/overwrite,
    /// rebinding the directory for any key whose node changed.
    fn touch(&mut self, key: &K, node: NodeRef<Entry<K, V>>, segment: Segment) {
        match segment {
            Segment::Window => self.window.get(node),
            Segment::Probation | Segment::Protected => match self.slru.get(node) {
                Hit::AlreadyProtected => {}
                Hit::Promoted(new_node) => {
                    self.directory.insert(key.clone(), new_node);
                }
                Hit::Swapped {
                    protected_node,
                    probation_node,
                    other_key,
                } => {
                    self.directory.insert(key.clone(), protected_node);
                    self.directory.insert(other_key, probation_node);
                }
            },
        }
    }

    /// TinyLFU admission rule (spec.md §4.6 step 3-4): a candidate evicted
    /// from Window competes with the SLRU probation tail.
    fn offer_to_slru(&mut self, mut candidate: Entry<K, V>) {
        candidate.segment = Segment::Probation;
        let candidate_key = candidate.key.clone();
        match self.slru.victim() {
            None => {
                let (node, evicted) = self.slru.add(candidate);
                self.directory.insert(candidate_key, node);
                if let Some(old) = evicted {
                    self.directory.remove(&old.key);
                    self.fire_evict(old.key, old.value);
                }
            }
            Some(victim_node) => {
                let victim_keyh = unsafe { victim_node.payload().keyh };
                let admitted = self.doorkeeper.allow(candidate.keyh)
                    && self.cm4.estimate(candidate.keyh) >= self.cm4.estimate(victim_keyh);
                if admitted {
                    log::debug!("admission: candidate displaces probation tail");
                    let victim_entry = self.slru.remove(victim_node, Segment::Probation);
                    self.directory.remove(&victim_entry.key);
                    self.fire_evict(victim_entry.key, victim_entry.value);

                    let (node, evicted) = self.slru.add(candidate);
                    self.directory.insert(candidate_key, node);
                    if let Some(old) = evicted {
                        self.directory.remove(&old.key);
                        self.fire_evict(old.key, old.value);
                    }
                } else {
                    log::trace!("admission: candidate rejected");
                    self.fire_evict(candidate.key, candidate.value);
                }
            }
        }
    }

    fn fire_evict(&mut self, key: K, value: V) {
        if let Some(cb) = self.on_evict.as_mut() {
            cb(key, value);
        }
    }

    fn maybe_adapt(&mut self) {
        if self.sizer.is_none() {
            return;
        }
        let probed = self.sizer.as_mut().unwrap().tick();
        if let Some(pct) = probed {
            let (w_cap, a1_cap, a2_cap) = caps_for_pct(self.size, pct);
            log::debug!("adaptive resize: lru_pct={pct} window_cap={w_cap}");
            self.window.set_cap(w_cap);
            self.slru.set_caps(a1_cap, a2_cap);
            self.rebalance();
        }
    }

    /// Migrate entries to respect newly-shrunk caps, bounded so a resize
    /// can never degrade into unbounded-latency work (spec.md §4.7).
    fn rebalance(&mut self) {
        let mut migrations = 0usize;
        while self.window.len() > self.window.cap() && migrations < REBALANCE_MIGRATION_CAP {
            let entry = match self.window.pop_back() {
                Some(e) => e,
                None => break,
            };
            self.directory.remove(&entry.key);
            self.migrate_to_slru(entry);
            migrations += 1;
        }
        while self.slru.probation_len() > self.slru.a1_cap() && migrations < REBALANCE_MIGRATION_CAP
        {
            let entry = match self.slru.pop_probation_back() {
                Some(e) => e,
                None => break,
            };
            self.directory.remove(&entry.key);
            self.push_to_window(entry);
            migrations += 1;
        }
        while self.slru.protected_len() > self.slru.a2_cap() && migrations < REBALANCE_MIGRATION_CAP
        {
            let entry = match self.slru.pop_protected_back() {
                Some(e) => e,
                None => break,
            };
            self.directory.remove(&entry.key);
            self.push_to_window(entry);
            migrations += 1;
        }
    }

    fn push_to_window(&mut self, mut entry: Entry<K, V>) {
        entry.segment = Segment::Window;
        let key = entry.key.clone();
        let (node, evicted) = self.window.add(entry);
        self.directory.insert(key, node);
        if let Some(old) = evicted {
            self.directory.remove(&old.key);
            self.offer_to_slru(old);
        }
    }

    /// Unconditional counterpart to `push_to_window`, used by `rebalance`
    /// (spec.md §4.7: "pop Window tail and `SLRU.add(payload)`" -- no
    /// admission contest, since this entry isn't a fresh arrival, it's
    /// capacity reshuffling a resize just made room for).
    fn migrate_to_slru(&mut self, mut entry: Entry<K, V>) {
        entry.segment = Segment::Probation;
        let key = entry.key.clone();
        let (node, evicted) = self.slru.add(entry);
        self.directory.insert(key, node);
        if let Some(old) = evicted {
            self.directory.remove(&old.key);
            self.fire_evict(old.key, old.value);
        }
    }
}

fn caps_for_pct(size: usize, lru_pct: f32) -> (usize, usize, usize) {
    let w_cap = (((size as f32) * lru_pct / 100.0).floor() as usize).max(1);
    let s_cap = size.saturating_sub(w_cap).max(1);
    let a1_cap = ((s_cap as f32 * 0.2).floor() as usize).max(1);
    let a2_cap = s_cap.saturating_sub(a1_cap).max(1);
    (w_cap, a1_cap, a2_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn basic_add_get() {
        let mut c: Cache<&str, &str> = Cache::new(100, 10_000);
        c.add("foo", "bar");
        assert_eq!(c.get_with_hit(&"foo"), (Some(&"bar"), true));
        c.add("foo", "baz");
        assert_eq!(c.get_with_hit(&"foo"), (Some(&"baz"), true));
        assert_eq!(c.get_with_hit(&"missing"), (None, false));
    }

    #[test]
    fn replace_callback_fires_once_no_evict() {
        let replaced: Rc<RefCell<Vec<(&str, &str)>>> = Rc::new(RefCell::new(Vec::new()));
        let evicted: Rc<RefCell<Vec<(&str, &str)>>> = Rc::new(RefCell::new(Vec::new()));
        let replaced_cb = replaced.clone();
        let evicted_cb = evicted.clone();
        let mut c: Cache<&str, &str> = CacheBuilder::new(10, 20)
            .on_replace(move |k, v| replaced_cb.borrow_mut().push((k, v)))
            .on_evict(move |k, v| evicted_cb.borrow_mut().push((k, v)))
            .build();
        c.add("A", "1");
        c.add("B", "2");
        c.add("A", "3");
        assert_eq!(*replaced.borrow(), vec![("A", "1")]);
        assert!(evicted.borrow().is_empty());
    }

    #[test]
    fn idempotent_reinsertion_single_directory_entry() {
        let mut c: Cache<&str, &str> = Cache::new(100, 10_000);
        c.add("k", "v");
        c.add("k", "v");
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_with_hit(&"k"), (Some(&"v"), true));
    }

    #[test]
    fn no_pollution_under_churn() {
        let mut c: Cache<i32, i32> = Cache::new(10, 1_000);
        for i in 0..100 {
            c.add(i, i);
            for j in 0..i {
                if let Some(&v) = c.get(&j) {
                    assert_eq!(v, j);
                }
            }
        }
    }

    #[test]
    fn eviction_callback_fires_on_overflow() {
        let evicted: Rc<RefCell<Vec<(&str, &str)>>> = Rc::new(RefCell::new(Vec::new()));
        let evicted_cb = evicted.clone();
        let mut c: Cache<&str, &str> = CacheBuilder::new(2, 20)
            .on_evict(move |k, v| evicted_cb.borrow_mut().push((k, v)))
            .build();
        c.add("A", "1");
        c.add("B", "2");
        c.add("C", "3");
        assert_eq!(evicted.borrow().len(), 1);
    }

    #[test]
    fn remove_detaches_from_directory() {
        let mut c: Cache<&str, &str> = Cache::new(100, 10_000);
        c.add("k", "v");
        assert_eq!(c.remove(&"k"), Some("v"));
        assert_eq!(c.get(&"k"), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn capacity_reports_window_plus_slru() {
        let c: Cache<&str, &str> = Cache::new(100, 10_000);
        assert_eq!(c.capacity(), c.window.cap() + c.slru.cap());
        assert!(c.capacity() >= 100 || c.capacity() >= 3);
    }

    #[test]
    fn scan_resistance_hot_key_stays_resident() {
        let mut c: Cache<i32, i32> = Cache::new(50, 5_000);
        c.add(-1, -1);
        c.get(&-1);
        for i in 0..2_000 {
            c.add(i, i);
            c.get(&-1);
        }
        assert_eq!(c.get_with_hit(&-1), (Some(&-1), true));
    }

    #[test]
    fn adaptive_sizer_keeps_caps_respected() {
        let mut c: Cache<i32, i32> = CacheBuilder::new(50, 200).adaptive(true).build();
        for i in 0..5_000 {
            c.add(i, i);
            c.get(&(i / 2));
            assert!(c.len() <= c.capacity());
        }
    }
}
