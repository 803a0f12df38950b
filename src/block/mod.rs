//! Block layer: layout arithmetic, per-block locality, the cache tiers and
//! the stream families that move bytes in and out of a file's blocks.

pub mod cache;
pub mod in_stream;
pub mod layout;
pub mod locator;
pub mod out_stream;

use std::fmt;

/// Identity of one block of one file. Blocks are addressed by the owning
/// file id plus the zero-based index within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub file_id: i64,
    pub index: u32,
}

impl BlockId {
    pub fn new(file_id: i64, index: u32) -> Self {
        Self { file_id, index }
    }

    /// Key under which this block lives in an object understore.
    pub fn object_key(&self) -> String {
        format!("blocks/{}/{}", self.file_id, self.index)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file_id, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_layout() {
        let id = BlockId::new(42, 3);
        assert_eq!(id.object_key(), "blocks/42/3");
        assert_eq!(format!("{id}"), "42/3");
    }
}
