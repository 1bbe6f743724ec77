//! Offset lookups over a file's blocks, grouped by segment.
//!
//! All lookups run inside the caller's transaction so they see the same
//! snapshot the following resolution and mutation use.
use serde::{Deserialize, Serialize};

use crate::meta::store::{FileKey, MetaError, MetaTxn, SegmentId};
use crate::segment::block::BlockRecord;

/// Block start offsets of one segment, ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPositions {
    pub segment: SegmentId,
    pub positions: Vec<u64>,
}

impl SegmentPositions {
    pub fn first(&self) -> Option<u64> {
        self.positions.first().copied()
    }
}

/// Segments whose byte range contains `offset`.
///
/// Ranges of different segments can interleave, so a segment's range is
/// taken from its blocks: a segment matches when one of its blocks contains
/// `offset`. The `start_offset`/`end_offset` stored on segment records only
/// summarize that range and are not consulted here.
pub async fn segments_including_offset(
    txn: &dyn MetaTxn,
    file: &FileKey,
    offset: u64,
) -> Result<Vec<SegmentPositions>, MetaError> {
    let blocks = txn.blocks_including(file, offset).await?;
    Ok(group_by_segment(&blocks))
}

/// Segments holding blocks that start at or after `offset` (and before
/// `before` when given), ascending by their first such block.
pub async fn segments_after_offset(
    txn: &dyn MetaTxn,
    file: &FileKey,
    offset: u64,
    before: Option<u64>,
) -> Result<Vec<SegmentPositions>, MetaError> {
    let blocks = txn.blocks_from(file, offset, before).await?;
    Ok(group_by_segment(&blocks))
}

/// Every persisted block intersecting `[offset, end)`.
pub async fn overlapping_blocks(
    txn: &dyn MetaTxn,
    file: &FileKey,
    offset: u64,
    end: u64,
) -> Result<Vec<BlockRecord>, MetaError> {
    let mut blocks = txn.blocks_including(file, offset).await?;
    for b in txn.blocks_from(file, offset, Some(end)).await? {
        if !blocks.iter().any(|seen| seen.id == b.id) {
            blocks.push(b);
        }
    }
    blocks.sort_by_key(|b| (b.offset, b.id));
    Ok(blocks)
}

/// Recompute a segment's offset range from its remaining blocks. A segment
/// whose blocks were all superseded keeps its last range.
pub async fn refresh_segment_range(
    txn: &dyn MetaTxn,
    file: &FileKey,
    segment: SegmentId,
) -> Result<(), MetaError> {
    let blocks = txn.segment_blocks(file, segment).await?;
    let start = blocks.iter().map(|b| b.offset).min();
    let end = blocks.iter().map(BlockRecord::end).max();
    if let (Some(start), Some(end)) = (start, end) {
        txn.update_segment_range(file, segment, start, end).await?;
    }
    Ok(())
}

/// Group blocks by segment, keeping the first-seen segment order.
pub fn group_by_segment(blocks: &[BlockRecord]) -> Vec<SegmentPositions> {
    let mut groups: Vec<SegmentPositions> = Vec::new();
    for b in blocks {
        match groups.iter_mut().find(|g| g.segment == b.segment) {
            Some(g) => g.positions.push(b.offset),
            None => groups.push(SegmentPositions {
                segment: b.segment,
                positions: vec![b.offset],
            }),
        }
    }
    for g in &mut groups {
        g.positions.sort_unstable();
        g.positions.dedup();
    }
    groups
}

/// Union of two lookups: a segment present in both appears once with the
/// merged positions, ordered by its first position.
pub fn merge_groups(
    including: Vec<SegmentPositions>,
    after: Vec<SegmentPositions>,
) -> Vec<SegmentPositions> {
    let mut merged = including;
    for group in after {
        match merged.iter_mut().find(|g| g.segment == group.segment) {
            Some(g) => {
                g.positions.extend(group.positions);
                g.positions.sort_unstable();
                g.positions.dedup();
            }
            None => merged.push(group),
        }
    }
    merged.sort_by_key(|g| (g.first(), g.segment));
    merged
}
