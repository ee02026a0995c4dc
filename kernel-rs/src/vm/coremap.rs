//! The core map: who owns each physical frame.
//!
//! An ordered sequence of `(address space, virtual page, frame)` triples
//! with the most recently used at the tail. Touching a frame moves its
//! entry to the tail; the eviction victim is always the head — strict LRU.
//!
//! An entry leaves the map in exactly two ways: its owning address space
//! dies, or the frame is picked as victim. The frame bitmap and this map
//! agree at all times on which frames user pages hold.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::vm::AddressSpace;

pub struct CoreEntry {
    pub space: Arc<AddressSpace>,
    pub vpn: u32,
    pub frame: u32,
}

pub struct CoreMap {
    entries: VecDeque<CoreEntry>,
}

impl CoreMap {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Record that `space` holds `vpn` in `frame`, as the most recent use.
    pub fn store(&mut self, space: &Arc<AddressSpace>, vpn: u32, frame: u32) {
        debug_assert!(
            self.entries.iter().all(|e| e.frame != frame),
            "coremap: frame {} stored twice",
            frame
        );
        self.entries.push_back(CoreEntry {
            space: Arc::clone(space),
            vpn,
            frame,
        });
    }

    /// Mark a use of `frame`: move its entry to the tail.
    pub fn access(&mut self, frame: u32) {
        if let Some(pos) = self.entries.iter().position(|e| e.frame == frame) {
            if let Some(entry) = self.entries.remove(pos) {
                self.entries.push_back(entry);
            }
        }
    }

    pub fn find(&self, frame: u32) -> Option<(Arc<AddressSpace>, u32)> {
        self.entries
            .iter()
            .find(|e| e.frame == frame)
            .map(|e| (Arc::clone(&e.space), e.vpn))
    }

    pub fn remove(&mut self, frame: u32) {
        self.entries.retain(|e| e.frame != frame);
    }

    /// Detach the least recently used entry. The caller evicts it.
    pub fn take_victim(&mut self) -> Option<CoreEntry> {
        self.entries.pop_front()
    }

    /// Drop every entry belonging to a dying address space.
    pub fn clean_space(&mut self, asid: usize) {
        self.entries.retain(|e| e.space.asid() != asid);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CoreMap {
    fn default() -> Self {
        Self::new()
    }
}
