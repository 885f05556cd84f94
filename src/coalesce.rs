//! Contiguous block grouping for bulk reads.
//!
//! Each request on the bus carries a fixed protocol and transport latency
//! that dominates over payload size for small register counts, so a sparse
//! address set is read with the minimum number of round-trips: sort once,
//! scan once, and cut a new block wherever the address sequence has a gap.

/// One contiguous read request: `count` registers or coils from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBlock {
    /// First address covered by the block.
    pub start: u16,
    /// Number of consecutive addresses covered.
    pub count: u16,
}

impl ReadBlock {
    /// Address one past the end of the block.
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    /// True if the block covers `address`.
    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && u32::from(address) < self.end()
    }
}

/// Group an unordered address set into minimal contiguous blocks.
///
/// The result covers exactly the input set: blocks are sorted by start
/// address, pairwise disjoint and internally gap-free. Duplicate input
/// addresses are collapsed. An empty input yields no blocks, which callers
/// treat as "nothing to read" rather than an error.
pub fn coalesce(addresses: &[u16]) -> Vec<ReadBlock> {
    if addresses.is_empty() {
        return Vec::new();
    }

    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut blocks = Vec::new();
    let mut start = sorted[0];
    let mut count: u16 = 1;

    for &address in &sorted[1..] {
        if u32::from(address) == u32::from(start) + u32::from(count) {
            count += 1;
        } else {
            blocks.push(ReadBlock { start, count });
            start = address;
            count = 1;
        }
    }
    blocks.push(ReadBlock { start, count });
    blocks
}
