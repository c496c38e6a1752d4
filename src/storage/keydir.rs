//! The in-memory index from key bytes to the segment and byte range holding
//! that key's current value. Backed by a `BTreeMap` (rather than a hash map)
//! so that `Engine::scan` can walk live keys in ascending order; iteration
//! order is otherwise unobserved by callers.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeydirEntry {
    pub segment_id: u32,
    pub value_offset: u64,
    pub value_length: u32,
}

pub type Keydir = BTreeMap<Vec<u8>, KeydirEntry>;
