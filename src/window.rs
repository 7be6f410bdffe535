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

//! Window LRU: the small ring of newest arrivals that every new key passes
//! through before it is considered for SLRU residency.

use crate::entry::Entry;
use crate::list::{List, NodeRef};

pub(crate) struct Window<K, V> {
    list: List<Entry<K, V>>,
    cap: usize,
}

impl<K, V> Window<K, V> {
    pub(crate) fn new(cap: usize) -> Self {
        Window {
            list: List::new(),
            cap: cap.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap
    }

    pub(crate) fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
    }

    /// Admit `entry`. Returns `None` when there was free room (entry just
    /// pushed to the front); returns `Some(old)` when the tail node was
    /// reused, `old` being the payload it used to hold (spec.md §4.4).
    pub(crate) fn add(&mut self, entry: Entry<K, V>) -> (NodeRef<Entry<K, V>>, Option<Entry<K, V>>) {
        if self.list.len() < self.cap {
            let node = self.list.push_front(entry);
            (node, None)
        } else {
            let (node, old) = self.list.replace_back(entry);
            (node, Some(old))
        }
    }

    pub(crate) fn get(&mut self, node: NodeRef<Entry<K, V>>) {
        self.list.move_to_front(node);
    }

    pub(crate) fn remove(&mut self, node: NodeRef<Entry<K, V>>) -> Entry<K, V> {
        self.list.remove(node)
    }

    pub(crate) fn back(&self) -> Option<NodeRef<Entry<K, V>>> {
        self.list.back()
    }

    /// Detach the LRU entry, if any, for migration elsewhere (adaptive
    /// resize). The caller is responsible for updating the directory.
    pub(crate) fn pop_back(&mut self) -> Option<Entry<K, V>> {
        let node = self.list.back()?;
        Some(self.list.remove(node))
    }
}
