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

//! Segmented LRU: probationary (A1) and protected (A2) residency.
//!
//! A candidate enters at Probation; a hit in Probation promotes it to
//! Protected outright if there is room, otherwise it trades places with
//! the Protected tail (spec.md §4.5). The trade is done in place via
//! [`crate::list::swap_payloads`] so neither node is reallocated -- only
//! the segment tags and the directory's key-to-node bindings change.

use crate::entry::{Entry, Segment};
use crate::list::{self, List, NodeRef};

pub(crate) enum Hit<K, V> {
    /// Already resident in Protected; just bumped to its front.
    AlreadyProtected,
    /// Promoted from Probation straight into Protected (room was free).
    /// The old node was deallocated; `new_node` is where the entry now
    /// lives and the directory must be rebound to it.
    Promoted(NodeRef<Entry<K, V>>),
    /// Traded places with the Protected tail. Both nodes kept their
    /// original identity/position in their own list; only their payloads
    /// (and hence which key they answer to) changed. The directory must
    /// rebind the looked-up key to `protected_node` and `other_key` to
    /// `probation_node`.
    Swapped {
        protected_node: NodeRef<Entry<K, V>>,
        probation_node: NodeRef<Entry<K, V>>,
        other_key: K,
    },
}

pub(crate) struct Slru<K, V> {
    probation: List<Entry<K, V>>,
    protected: List<Entry<K, V>>,
    a1_cap: usize,
    a2_cap: usize,
}

impl<K: Clone, V> Slru<K, V> {
    pub(crate) fn new(a1_cap: usize, a2_cap: usize) -> Self {
        Slru {
            probation: List::new(),
            protected: List::new(),
            a1_cap: a1_cap.max(1),
            a2_cap: a2_cap.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.probation.len() + self.protected.len()
    }

    pub(crate) fn cap(&self) -> usize {
        self.a1_cap + self.a2_cap
    }

    pub(crate) fn a1_cap(&self) -> usize {
        self.a1_cap
    }

    pub(crate) fn a2_cap(&self) -> usize {
        self.a2_cap
    }

    pub(crate) fn set_caps(&mut self, a1_cap: usize, a2_cap: usize) {
        self.a1_cap = a1_cap.max(1);
        self.a2_cap = a2_cap.max(1);
    }

    pub(crate) fn probation_len(&self) -> usize {
        self.probation.len()
    }

    pub(crate) fn protected_len(&self) -> usize {
        self.protected.len()
    }

    /// Handle a hit on a node already resident somewhere in SLRU.
    pub(crate) fn get(&mut self, node: NodeRef<Entry<K, V>>) -> Hit<K, V> {
        let segment = unsafe { node.payload() }.segment;
        match segment {
            Segment::Protected => {
                self.protected.move_to_front(node);
                Hit::AlreadyProtected
            }
            Segment::Window => {
                unreachable!("SLRU::get called on a node still tagged Window")
            }
            Segment::Probation => {
                if self.protected.len() < self.a2_cap {
                    let mut entry = self.probation.remove(node);
                    entry.segment = Segment::Protected;
                    let new_node = self.protected.push_front(entry);
                    Hit::Promoted(new_node)
                } else {
                    let mut probation_node = node;
                    let mut protected_node = self
                        .protected
                        .back()
                        .expect("protected at capacity is non-empty");
                    let other_key = unsafe { protected_node.payload() }.key.clone();
                    list::swap_payloads(&mut probation_node, &mut protected_node);
                    unsafe {
                        probation_node.payload_mut().segment = Segment::Probation;
                        protected_node.payload_mut().segment = Segment::Protected;
                    }
                    self.probation.move_to_front(probation_node);
                    self.protected.move_to_front(protected_node);
                    Hit::Swapped {
                        protected_node,
                        probation_node,
                        other_key,
                    }
                }
            }
        }
    }

    /// Admit a fresh candidate into Probation (spec.md §4.5 `add`).
    pub(crate) fn add(&mut self, entry: Entry<K, V>) -> (NodeRef<Entry<K, V>>, Option<Entry<K, V>>) {
        if self.probation.len() < self.a1_cap || self.len() < self.cap() {
            let node = self.probation.push_front(entry);
            (node, None)
        } else {
            let (node, old) = self.probation.replace_back(entry);
            (node, Some(old))
        }
    }

    /// The eviction candidate: the Probation tail, but only once SLRU is
    /// actually at capacity (spec.md §4.5 `victim`).
    pub(crate) fn victim(&self) -> Option<NodeRef<Entry<K, V>>> {
        if self.len() >= self.cap() {
            self.probation.back()
        } else {
            None
        }
    }

    pub(crate) fn remove(&mut self, node: NodeRef<Entry<K, V>>, segment: Segment) -> Entry<K, V> {
        match segment {
            Segment::Probation => self.probation.remove(node),
            Segment::Protected => self.protected.remove(node),
            Segment::Window => unreachable!("SLRU::remove called with a Window-tagged node"),
        }
    }

    pub(crate) fn pop_probation_back(&mut self) -> Option<Entry<K, V>> {
        let node = self.probation.back()?;
        Some(self.probation.remove(node))
    }

    pub(crate) fn pop_protected_back(&mut self) -> Option<Entry<K, V>> {
        let node = self.protected.back()?;
        Some(self.protected.remove(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: i32) -> Entry<i32, i32> {
        Entry {
            key,
            value: key,
            keyh: key as u64,
            segment: Segment::Probation,
        }
    }

    #[test]
    fn add_pushes_front_while_under_total_capacity() {
        let mut s: Slru<i32, i32> = Slru::new(2, 2);
        let (_, e1) = s.add(entry(1));
        let (_, e2) = s.add(entry(2));
        let (_, e3) = s.add(entry(3));
        let (_, e4) = s.add(entry(4));
        assert!(e1.is_none() && e2.is_none() && e3.is_none() && e4.is_none());
        assert_eq!(s.probation_len(), 4);
    }

    #[test]
    fn add_reuses_probation_tail_once_full() {
        let mut s: Slru<i32, i32> = Slru::new(2, 2);
        for k in 1..=4 {
            s.add(entry(k));
        }
        // SLRU is now at its total cap (4) with nothing in Protected, so
        // the next add must reuse the Probation tail (the LRU entry, key 1).
        let (_, evicted) = s.add(entry(5));
        assert_eq!(evicted.unwrap().key, 1);
        assert_eq!(s.probation_len(), 4);
    }

    #[test]
    fn victim_is_none_until_slru_is_full() {
        let mut s: Slru<i32, i32> = Slru::new(1, 1);
        assert!(s.victim().is_none());
        s.add(entry(1));
        assert!(s.victim().is_none());
        s.add(entry(2));
        assert!(s.victim().is_some());
    }

    #[test]
    fn get_promotes_probation_hit_when_protected_has_room() {
        let mut s: Slru<i32, i32> = Slru::new(2, 2);
        let (node1, _) = s.add(entry(1));
        s.add(entry(2));

        match s.get(node1) {
            Hit::Promoted(new_node) => {
                assert_eq!(unsafe { new_node.payload() }.key, 1);
                assert_eq!(unsafe { new_node.payload() }.segment, Segment::Protected);
            }
            _ => panic!("expected a promotion"),
        }
        assert_eq!(s.probation_len(), 1);
        assert_eq!(s.protected_len(), 1);
    }

    #[test]
    fn get_on_already_protected_node_just_reorders() {
        let mut s: Slru<i32, i32> = Slru::new(2, 2);
        let (node1, _) = s.add(entry(1));
        let promoted = match s.get(node1) {
            Hit::Promoted(n) => n,
            _ => panic!("expected a promotion"),
        };
        match s.get(promoted) {
            Hit::AlreadyProtected => {}
            _ => panic!("expected AlreadyProtected"),
        }
        assert_eq!(s.protected_len(), 1);
    }

    #[test]
    fn get_swaps_with_protected_tail_once_protected_is_full() {
        let mut s: Slru<i32, i32> = Slru::new(3, 1);
        let (node1, _) = s.add(entry(1));
        let (node2, _) = s.add(entry(2));
        s.add(entry(3));

        // Fill Protected (cap 1) via a straight promotion of key 1.
        match s.get(node1) {
            Hit::Promoted(_) => {}
            _ => panic!("expected a promotion"),
        }
        assert_eq!(s.protected_len(), 1);

        // A second probation hit must now trade places with Protected's
        // sole resident instead of promoting outright.
        match s.get(node2) {
            Hit::Swapped {
                protected_node,
                probation_node,
                other_key,
            } => {
                assert_eq!(other_key, 1);
                assert_eq!(unsafe { protected_node.payload() }.key, 2);
                assert_eq!(
                    unsafe { protected_node.payload() }.segment,
                    Segment::Protected
                );
                assert_eq!(unsafe { probation_node.payload() }.key, 1);
                assert_eq!(
                    unsafe { probation_node.payload() }.segment,
                    Segment::Probation
                );
            }
            _ => panic!("expected a swap"),
        }
        assert_eq!(s.protected_len(), 1);
        assert_eq!(s.probation_len(), 2);
    }
}
