// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tokio::time::Instant;

use crate::ResourceHandle;

/// An idle pool entry: a resource plus the earliest instant at which it
/// becomes freely reclaimable for disposal or reassignment.
#[derive(Debug)]
pub(crate) struct IdleItem<T> {
    pub(crate) res: T,
    pub(crate) reclaim_at: Instant,
}

/// A min-heap of idle entries ordered by reclamation deadline.
///
/// The root is always the entry that becomes reclaimable soonest. All calls
/// happen under the pool mutex, so the heap itself is single-threaded.
/// Pool populations are in the tens, so the O(n) scans in `find` and `rob`
/// are not worth an ID index.
#[derive(Debug)]
pub(crate) struct IdleHeap<T> {
    slots: Vec<IdleItem<T>>,
}

impl<T: ResourceHandle> IdleHeap<T> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over the entries in storage order, not deadline order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &IdleItem<T>> {
        self.slots.iter()
    }

    pub(crate) fn push(&mut self, item: IdleItem<T>) {
        self.slots.push(item);
        self.sift_up(self.slots.len() - 1);
    }

    /// Removes and returns the entry with the smallest deadline.
    pub(crate) fn pop(&mut self) -> Option<IdleItem<T>> {
        if self.slots.is_empty() {
            return None;
        }
        let item = self.slots.swap_remove(0);
        if !self.slots.is_empty() {
            self.sift_down(0);
        }
        Some(item)
    }

    /// Returns the entry with the smallest deadline without removing it.
    pub(crate) fn peek(&self) -> Option<&IdleItem<T>> {
        self.slots.first()
    }

    pub(crate) fn find(&self, res_id: &str) -> Option<&IdleItem<T>> {
        self.slots.iter().find(|it| it.res.resource_id() == res_id)
    }

    /// Removes the entry with the given resource ID regardless of its
    /// position, restoring the heap invariant around the hole.
    pub(crate) fn rob(&mut self, res_id: &str) -> Option<IdleItem<T>> {
        let pos = self
            .slots
            .iter()
            .position(|it| it.res.resource_id() == res_id)?;
        let item = self.slots.swap_remove(pos);
        if pos < self.slots.len() {
            // The element swapped into the hole may be out of place in
            // either direction.
            if pos > 0 && self.slots[pos].reclaim_at < self.slots[(pos - 1) / 2].reclaim_at {
                self.sift_up(pos);
            } else {
                self.sift_down(pos);
            }
        }
        Some(item)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.slots[pos].reclaim_at >= self.slots[parent].reclaim_at {
                break;
            }
            self.slots.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.slots[right].reclaim_at < self.slots[left].reclaim_at {
                smallest = right;
            }
            if self.slots[pos].reclaim_at <= self.slots[smallest].reclaim_at {
                break;
            }
            self.slots.swap(pos, smallest);
            pos = smallest;
        }
    }
}
