//! Address-ordered free list with best-fit size indexes
//!
//! Free blocks are keyed by address so adjacency (and therefore
//! coalescing) is a neighbour lookup, and every merge is two removals plus
//! one insertion. Two secondary indexes answer best-fit queries without a
//! scan: one ordered by `(stream, size, address)` for same-stream reuse and
//! one ordered by `(size, address)` for any-stream reuse.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::{DevicePtr, StreamHandle};

/// Contiguous region of pool memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    pub ptr: DevicePtr,
    pub size: usize,
    /// Stream whose work last touched this memory
    pub stream: StreamHandle,
    /// Upstream reservation this block was carved from
    pub reservation: u32,
}

impl Block {
    /// One past the last address of the block
    pub fn end(&self) -> usize {
        self.ptr.addr() + self.size
    }

    /// Check if this block is immediately before another block in the same
    /// reservation
    pub fn is_adjacent_to(&self, other: &Block) -> bool {
        self.reservation == other.reservation && self.end() == other.ptr.addr()
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.ptr.addr() < other.end() && other.ptr.addr() < self.end()
    }

    /// Split off the first `bytes`, returning the used part and the remainder
    pub fn split(self, bytes: usize) -> (Block, Option<Block>) {
        debug_assert!(bytes <= self.size);
        if bytes == self.size {
            return (self, None);
        }
        let head = Block { size: bytes, ..self };
        let tail = Block {
            ptr: self.ptr.offset(bytes),
            size: self.size - bytes,
            ..self
        };
        (head, Some(tail))
    }
}

#[derive(Debug, Default)]
pub(crate) struct FreeList {
    by_addr: BTreeMap<DevicePtr, Block>,
    by_stream: BTreeSet<(StreamHandle, usize, DevicePtr)>,
    by_size: BTreeSet<(usize, DevicePtr)>,
    total: usize,
}

impl FreeList {
    /// Insert without coalescing
    pub fn insert(&mut self, block: Block) {
        debug_assert!(block.size > 0, "empty block inserted into free list");
        debug_assert!(
            !self.overlaps_existing(&block),
            "free block {:?} overlaps an existing free block",
            block
        );
        self.by_stream.insert((block.stream, block.size, block.ptr));
        self.by_size.insert((block.size, block.ptr));
        self.by_addr.insert(block.ptr, block);
        self.total += block.size;
    }

    pub fn remove(&mut self, ptr: DevicePtr) -> Option<Block> {
        let block = self.by_addr.remove(&ptr)?;
        self.by_stream.remove(&(block.stream, block.size, block.ptr));
        self.by_size.remove(&(block.size, block.ptr));
        self.total -= block.size;
        Some(block)
    }

    /// Smallest block tagged with `stream` that holds `bytes`
    pub fn best_fit_on_stream(&self, stream: StreamHandle, bytes: usize) -> Option<Block> {
        self.by_stream
            .range((stream, bytes, DevicePtr::null())..)
            .next()
            .filter(|(s, _, _)| *s == stream)
            .and_then(|(_, _, ptr)| self.by_addr.get(ptr).copied())
    }

    /// Smallest block of any stream that holds `bytes`
    pub fn best_fit_any(&self, bytes: usize) -> Option<Block> {
        self.by_size
            .range((bytes, DevicePtr::null())..)
            .next()
            .and_then(|(_, ptr)| self.by_addr.get(ptr).copied())
    }

    /// Insert `block`, merging it with address-adjacent free neighbours.
    ///
    /// `can_merge` is asked about each neighbour before it is absorbed.
    /// The merged block keeps `block`'s stream tag. Returns the block as it
    /// now sits in the list.
    pub fn insert_coalescing<F>(&mut self, block: Block, mut can_merge: F) -> Block
    where
        F: FnMut(&Block) -> bool,
    {
        let mut merged = block;

        let prev = self
            .by_addr
            .range(..merged.ptr)
            .next_back()
            .map(|(_, b)| *b)
            .filter(|prev| prev.is_adjacent_to(&merged));
        if let Some(prev) = prev {
            if can_merge(&prev) {
                self.remove(prev.ptr);
                merged.ptr = prev.ptr;
                merged.size += prev.size;
            }
        }

        let next = self
            .by_addr
            .range(merged.ptr..)
            .next()
            .map(|(_, b)| *b)
            .filter(|next| merged.is_adjacent_to(next));
        if let Some(next) = next {
            if can_merge(&next) {
                self.remove(next.ptr);
                merged.size += next.size;
            }
        }

        self.insert(merged);
        merged
    }

    /// Total free bytes
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn largest(&self) -> usize {
        self.by_size.iter().next_back().map(|(size, _)| *size).unwrap_or(0)
    }

    /// Blocks in address order
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.by_addr.values()
    }

    fn overlaps_existing(&self, block: &Block) -> bool {
        let prev = self.by_addr.range(..=block.ptr).next_back();
        let next = self.by_addr.range(block.ptr..).next();
        prev.into_iter()
            .chain(next)
            .any(|(_, existing)| existing.overlaps(block))
    }
}
