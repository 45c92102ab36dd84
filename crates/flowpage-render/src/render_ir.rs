use flowpage::{ContentPosition, Fields, PageEnvelope};
use serde::{Deserialize, Serialize};

/// How a block shows up in a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceRole {
    /// Only the opening tag; children follow in the same column.
    Open,
    /// The block starts in this column.
    Whole,
    /// The block started in an earlier column.
    Continued,
}

/// One block placed in a column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockSlice {
    /// Index into `Content::blocks`.
    pub block: usize,
    pub role: SliceRole,
    /// Height of the block hidden above the column top (shown earlier).
    pub clip_top: f32,
    /// The block runs past the column bottom and continues later.
    pub truncated: bool,
}

impl BlockSlice {
    pub fn open(block: usize) -> Self {
        Self {
            block,
            role: SliceRole::Open,
            clip_top: 0.0,
            truncated: false,
        }
    }
}

/// Text placed in one grid column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnFill {
    /// Final column height, clipped to whole lines when a block overflows.
    pub height: f32,
    /// Height taken by the placed blocks, margins included.
    pub content_height: f32,
    pub slices: Vec<BlockSlice>,
}

impl ColumnFill {
    /// An unused column of the given height.
    pub fn empty(height: f32) -> Self {
        Self {
            height,
            content_height: 0.0,
            slices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Blocks that begin or continue here, open tags excluded.
    pub fn placed_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.slices
            .iter()
            .filter(|s| s.role != SliceRole::Open)
            .map(|s| s.block)
    }
}

/// A figure shown in a grid container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacedFigure {
    pub figure_index: usize,
    /// Container index in the grid, `None` on a forced figure page.
    pub container_index: Option<usize>,
    /// Size name that was selected.
    pub size: String,
    pub payload: String,
    /// Height the payload takes, on the line grid for flexible containers.
    pub height: f32,
    pub anchored_bottom: bool,
}

/// A finished page: its boundaries in the content stream and what it holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 1-based page number.
    pub page_number: usize,
    pub begin: ContentPosition,
    pub end: ContentPosition,
    /// Outer page size, after stretching or sizing to a container.
    pub size: PageEnvelope,
    /// Index of the grid in the caller's list, `None` on forced pages.
    pub grid_index: Option<usize>,
    pub columns: Vec<ColumnFill>,
    pub figures: Vec<PlacedFigure>,
    /// Optional figures given up on this page.
    pub dropped_figures: Vec<usize>,
    /// A dedicated page made to place a required figure that fit nowhere.
    pub forced: bool,
    pub fields: Fields,
}

impl PageDescriptor {
    /// True when `position` lies on this page.
    pub fn contains(&self, position: &ContentPosition) -> bool {
        self.begin.less_or_equal(position) && self.end.greater(position)
    }

    pub fn block_count(&self) -> usize {
        self.columns.iter().map(|c| c.placed_blocks().count()).sum()
    }
}

/// Stable pagination profile id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaginationProfileId(pub [u8; 32]);

impl PaginationProfileId {
    /// Build a deterministic profile id from arbitrary payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        fn fnv64(seed: u64, payload: &[u8]) -> u64 {
            let mut hash = seed;
            for b in payload {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            hash
        }
        let mut out = [0u8; 32];
        let seeds = [
            0xcbf29ce484222325,
            0x9e3779b97f4a7c15,
            0xd6e8feb86659fd93,
            0xa0761d6478bd642f,
        ];
        for (chunk, seed) in out.chunks_exact_mut(8).zip(seeds) {
            chunk.copy_from_slice(&fnv64(seed, bytes).to_le_bytes());
        }
        Self(out)
    }

    /// Lowercase hex form, used for cache directory names.
    pub fn to_hex(&self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        out
    }
}
