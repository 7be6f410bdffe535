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

//! Intrusive doubly-linked list of `Box`-owned nodes.
//!
//! Nodes are heap-allocated once and referenced from the outside world by
//! [`NodeRef`], a thin `Copy` handle over a `NonNull` pointer. The list is
//! the node's sole owner; everyone else (the cache directory) aliases it
//! through a `NodeRef` and never outlives the list. Front is MRU, back is
//! LRU. Every operation below is O(1).

use std::ptr::NonNull;

struct Node<P> {
    payload: P,
    prev: Option<NonNull<Node<P>>>,
    next: Option<NonNull<Node<P>>>,
}

/// A stable, `Copy`able handle to a node living inside some [`List`].
///
/// Holding a `NodeRef` does not keep the node alive: it is only valid for
/// as long as the `List` that created it has not removed or reused it for
/// another payload. The cache directory stores these as the "stable
/// reference" spec.md §3 describes.
pub(crate) struct NodeRef<P>(NonNull<Node<P>>);

impl<P> Clone for NodeRef<P> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<P> Copy for NodeRef<P> {}
impl<P> PartialEq for NodeRef<P> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<P> Eq for NodeRef<P> {}

impl<P> NodeRef<P> {
    /// # Safety
    /// The caller must ensure the node is still alive (owned by some
    /// `List` that has not removed/reused it) for as long as the caller
    /// holds on to the returned reference. The lifetime is chosen by the
    /// caller, mirroring `NonNull::as_ref`.
    pub(crate) unsafe fn payload<'a>(&self) -> &'a P {
        &(*self.0.as_ptr()).payload
    }
    /// # Safety
    /// Same contract as [`NodeRef::payload`].
    pub(crate) unsafe fn payload_mut<'a>(&mut self) -> &'a mut P {
        &mut (*self.0.as_ptr()).payload
    }
}

/// Doubly-linked list of `Box`-owned nodes with no built-in capacity limit;
/// callers (window/SLRU) enforce their own caps before calling `push_front`.
pub(crate) struct List<P> {
    head: Option<NonNull<Node<P>>>,
    tail: Option<NonNull<Node<P>>>,
    len: usize,
}

impl<P> List<P> {
    pub(crate) fn new() -> Self {
        List {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocate a new node holding `payload`, link it at the front (MRU
    /// position) and return a handle to it.
    pub(crate) fn push_front(&mut self, payload: P) -> NodeRef<P> {
        let node = Box::new(Node {
            payload,
            prev: None,
            next: self.head,
        });
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(node)) };
        match self.head {
            None => self.tail = Some(ptr),
            Some(mut old_head) => unsafe { old_head.as_mut().prev = Some(ptr) },
        }
        self.head = Some(ptr);
        self.len += 1;
        NodeRef(ptr)
    }

    /// Unlink `node` (assumed to belong to this list) without touching
    /// its neighbours' link fields beyond the splice, and deallocate it,
    /// returning the payload it held.
    pub(crate) fn remove(&mut self, node: NodeRef<P>) -> P {
        self.detach(node);
        let boxed = unsafe { Box::from_raw(node.0.as_ptr()) };
        self.len -= 1;
        boxed.payload
    }

    fn detach(&mut self, node: NodeRef<P>) {
        let (prev, next) = unsafe { (node.0.as_ref().prev, node.0.as_ref().next) };
        match prev {
            Some(mut p) => unsafe { p.as_mut().next = next },
            None => self.head = next,
        }
        match next {
            Some(mut n) => unsafe { n.as_mut().prev = prev },
            None => self.tail = prev,
        }
    }

    /// Move an already-linked node to the front (MRU position).
    pub(crate) fn move_to_front(&mut self, node: NodeRef<P>) {
        if self.head == Some(node) {
            return;
        }
        self.detach(node);
        unsafe {
            let ptr = node.0;
            (*ptr.as_ptr()).prev = None;
            (*ptr.as_ptr()).next = self.head;
        }
        match self.head {
            Some(mut old_head) => unsafe { old_head.as_mut().prev = Some(node.0) },
            None => self.tail = Some(node.0),
        }
        self.head = Some(node.0);
    }

    /// Handle to the LRU (back) node, without detaching it.
    pub(crate) fn back(&self) -> Option<NodeRef<P>> {
        self.tail.map(NodeRef)
    }

    /// Replace the payload of the back node in place, relink it at the
    /// front, and hand back the payload it used to hold. Used for
    /// tail-node reuse (spec.md §4.4/§4.5/§9 "Tail-node reuse"): avoids an
    /// allocation on the common eviction path.
    pub(crate) fn replace_back(&mut self, payload: P) -> (NodeRef<P>, P) {
        let tail = self.tail.expect("replace_back called on empty list");
        let node_ref = NodeRef(tail);
        let old_payload =
            std::mem::replace(unsafe { &mut (*tail.as_ptr()).payload }, payload);
        self.move_to_front(node_ref);
        (node_ref, old_payload)
    }
}

/// Exchange the payloads held by two nodes, which may live in different
/// lists, without allocating. Neither node's link fields are touched, so
/// both stay exactly where they were in their respective lists; only the
/// content changes hands. Used by SLRU's probation/protected swap (spec.md
/// §4.5) to migrate a candidate into Protected and its displaced resident
/// back into Probation in O(1) with no allocation.
pub(crate) fn swap_payloads<P>(a: &mut NodeRef<P>, b: &mut NodeRef<P>) {
    unsafe {
        std::ptr::swap(
            std::ptr::addr_of_mut!((*a.0.as_ptr()).payload),
            std::ptr::addr_of_mut!((*b.0.as_ptr()).payload),
        );
    }
}

impl<P> Drop for List<P> {
    fn drop(&mut self) {
        let mut cur = self.head;
        while let Some(ptr) = cur {
            let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
            cur = boxed.next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_front_and_back() {
        let mut l: List<i32> = List::new();
        l.push_front(1);
        l.push_front(2);
        l.push_front(3);
        assert_eq!(l.len(), 3);
        let back = l.back().unwrap();
        assert_eq!(unsafe { *back.payload() }, 1);
    }

    #[test]
    fn move_to_front_reorders() {
        let mut l: List<i32> = List::new();
        let r1 = l.push_front(1);
        l.push_front(2);
        l.push_front(3);
        l.move_to_front(r1);
        assert_eq!(l.len(), 3);
        // back should now be 2, since 1 moved to the front
        let back = l.back().unwrap();
        assert_eq!(unsafe { *back.payload() }, 2);
    }

    #[test]
    fn remove_detaches_and_drops() {
        let mut l: List<i32> = List::new();
        let r1 = l.push_front(1);
        let _r2 = l.push_front(2);
        let payload = l.remove(r1);
        assert_eq!(payload, 1);
        assert_eq!(l.len(), 1);
        let back = l.back().unwrap();
        assert_eq!(unsafe { *back.payload() }, 2);
    }

    #[test]
    fn replace_back_reuses_node() {
        let mut l: List<i32> = List::new();
        l.push_front(1);
        l.push_front(2);
        l.push_front(3);
        let (_node, old) = l.replace_back(99);
        assert_eq!(old, 1);
        assert_eq!(l.len(), 3);
        let back = l.back().unwrap();
        assert_eq!(unsafe { *back.payload() }, 2);
    }

    #[test]
    fn single_element_list() {
        let mut l: List<i32> = List::new();
        let r = l.push_front(42);
        assert_eq!(l.back(), Some(r));
        l.move_to_front(r);
        assert_eq!(l.len(), 1);
        let payload = l.remove(r);
        assert_eq!(payload, 42);
        assert!(l.is_empty());
    }
}
