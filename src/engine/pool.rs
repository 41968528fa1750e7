//! Reusable packet blocks circulated through the pipelined engines.
//!
//! A fixed number of blocks ([`crate::abi::MAXIMUM_BLOCK_NUM`]) travels
//! around the stage channels; when every block is downstream the read stage
//! blocks, which is the engines' backpressure mechanism.

use crate::abi::{
    IntermediateBuffer, MAXIMUM_PACKET_BLOCK, UNSORTED_MAXIMUM_PACKET_BLOCK,
};

/// Block for the sorted (single-adapter) pipeline: one envelope array plus
/// the per-direction dispatch lists filled by the process stage. The read and
/// write requests are materialized from these at the ioctl boundary, so the
/// block itself stays free of self-references.
pub(crate) struct PacketBlock {
    /// Envelope storage the read request points into.
    pub buffer: Box<[IntermediateBuffer]>,
    /// How many envelopes the last read delivered.
    pub read_count: usize,
    /// Indices of envelopes bound for the adapter.
    pub to_adapter: Vec<u16>,
    /// Indices of envelopes bound for the protocol stack.
    pub to_stack: Vec<u16>,
}

impl PacketBlock {
    pub(crate) fn new() -> Self {
        Self {
            buffer: vec![IntermediateBuffer::default(); MAXIMUM_PACKET_BLOCK]
                .into_boxed_slice(),
            read_count: 0,
            to_adapter: Vec::with_capacity(MAXIMUM_PACKET_BLOCK),
            to_stack: Vec::with_capacity(MAXIMUM_PACKET_BLOCK),
        }
    }

    /// Clears the dispatch lists and the read count for the next cycle.
    pub(crate) fn reset(&mut self) {
        self.read_count = 0;
        self.to_adapter.clear();
        self.to_stack.clear();
    }
}

/// Block for the multi-adapter pipeline. Envelopes may belong to different
/// adapters; the buffer grows past its initial capacity if a fast-I/O drain
/// delivers an unusually large burst, so no published envelope is dropped.
pub(crate) struct UnsortedPacketBlock {
    /// Envelopes drained from the fast-I/O sections, in per-section order.
    pub buffer: Vec<IntermediateBuffer>,
    /// Indices of envelopes bound for their adapters.
    pub to_adapter: Vec<u32>,
    /// Indices of envelopes bound for the protocol stack.
    pub to_stack: Vec<u32>,
}

impl UnsortedPacketBlock {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(UNSORTED_MAXIMUM_PACKET_BLOCK),
            to_adapter: Vec::with_capacity(UNSORTED_MAXIMUM_PACKET_BLOCK),
            to_stack: Vec::with_capacity(UNSORTED_MAXIMUM_PACKET_BLOCK),
        }
    }

    /// Clears everything for the next cycle; capacity is retained.
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.to_adapter.clear();
        self.to_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_block_capacity() {
        let block = PacketBlock::new();
        assert_eq!(block.buffer.len(), MAXIMUM_PACKET_BLOCK);
        assert_eq!(block.read_count, 0);
    }

    #[test]
    fn reset_clears_dispatch_lists() {
        let mut block = PacketBlock::new();
        block.read_count = 3;
        block.to_adapter.push(0);
        block.to_stack.push(1);
        block.reset();
        assert_eq!(block.read_count, 0);
        assert!(block.to_adapter.is_empty());
        assert!(block.to_stack.is_empty());
    }

    #[test]
    fn unsorted_block_grows_without_losing_capacity() {
        let mut block = UnsortedPacketBlock::new();
        for _ in 0..UNSORTED_MAXIMUM_PACKET_BLOCK + 4 {
            block.buffer.push(IntermediateBuffer::default());
        }
        assert!(block.buffer.len() > UNSORTED_MAXIMUM_PACKET_BLOCK);
        block.reset();
        assert!(block.buffer.is_empty());
        assert!(block.buffer.capacity() >= UNSORTED_MAXIMUM_PACKET_BLOCK);
    }
}
