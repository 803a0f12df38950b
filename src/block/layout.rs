//! Block-size arithmetic: mapping file offsets to block indices and splitting
//! file ranges into per-block spans.

/// Fixed block size of one file. Blocks are the unit of placement and caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u64,
}

impl BlockLayout {
    pub fn new(block_size: u64) -> BlockLayout {
        debug_assert!(block_size > 0, "block size must be positive");
        BlockLayout { block_size }
    }

    pub fn block_index_of(&self, offset: u64) -> u32 {
        (offset / self.block_size) as u32
    }

    pub fn offset_in_block(&self, offset: u64) -> u64 {
        offset % self.block_size
    }

    pub fn block_start(&self, index: u32) -> u64 {
        index as u64 * self.block_size
    }

    /// Number of blocks needed to hold `length` bytes.
    pub fn block_count(&self, length: u64) -> u32 {
        (length.div_ceil(self.block_size)) as u32
    }

    /// Byte length of block `index` within a file of `length` bytes; zero when
    /// the block lies entirely past the end.
    pub fn len_of_block(&self, length: u64, index: u32) -> u64 {
        let start = self.block_start(index);
        if start >= length {
            0
        } else {
            (length - start).min(self.block_size)
        }
    }
}

/// One block-local segment of a file range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub index: u32,
    pub offset_in_block: u64,
    pub len: usize,
}

/// Split `[offset, offset + len)` into spans that each stay inside one block.
pub fn split_range_into_blocks(layout: BlockLayout, mut offset: u64, len: usize) -> Vec<BlockSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let index = layout.block_index_of(offset);
        let offset_in_block = layout.offset_in_block(offset);
        let take = (layout.block_size - offset_in_block).min(remaining);
        out.push(BlockSpan {
            index,
            offset_in_block,
            len: take as usize,
        });
        offset += take;
        remaining -= take;
    }
    out
}
