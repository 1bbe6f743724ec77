use serde::{Deserialize, Serialize};

use crate::meta::store::{FileKey, MetaError, SegmentId};

/// An incoming write: `size` bytes of the file at `offset`, stored in the
/// segment object at `[seg_start_addr, seg_end_addr)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDesc {
    pub segment: SegmentId,
    pub offset: u64,
    pub size: u64,
    pub seg_start_addr: u64,
    pub seg_end_addr: u64,
}

impl BlockDesc {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn validate(&self) -> Result<(), MetaError> {
        if self.size == 0 {
            return Err(MetaError::InvalidArgument("block size must be positive".into()));
        }
        if self.offset.checked_add(self.size).is_none_or(|end| end > i64::MAX as u64) {
            return Err(MetaError::InvalidArgument(format!(
                "block [{}, +{}) exceeds the addressable range",
                self.offset, self.size
            )));
        }
        if self.seg_end_addr < self.seg_start_addr
            || self.seg_end_addr - self.seg_start_addr != self.size
        {
            return Err(MetaError::InvalidArgument(format!(
                "segment range [{}, {}) does not match block size {}",
                self.seg_start_addr, self.seg_end_addr, self.size
            )));
        }
        Ok(())
    }
}

/// A persisted block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: i64,
    pub file: FileKey,
    pub segment: SegmentId,
    pub offset: u64,
    pub size: u64,
    pub seg_start_addr: u64,
    pub seg_end_addr: u64,
    pub updated_at: i64,
}

impl BlockRecord {
    /// A not yet persisted record for `desc`; the store assigns the id.
    pub fn from_desc(file: &FileKey, desc: &BlockDesc, now: i64) -> Self {
        Self {
            id: 0,
            file: file.clone(),
            segment: desc.segment,
            offset: desc.offset,
            size: desc.size,
            seg_start_addr: desc.seg_start_addr,
            seg_end_addr: desc.seg_end_addr,
            updated_at: now,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn range(&self) -> (u64, u64) {
        (self.offset, self.end())
    }

    pub fn intersects(&self, offset: u64, end: u64) -> bool {
        self.offset < end && offset < self.end()
    }
}

/// Block mutations computed for one write, applied in a single transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockBatch {
    pub inserts: Vec<BlockRecord>,
    pub updates: Vec<BlockRecord>,
    pub deletes: Vec<BlockRecord>,
    /// Segments an updated block moved out of.
    pub vacated: Vec<SegmentId>,
}

impl BlockBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Segments whose block set this batch changes.
    pub fn touched_segments(&self) -> Vec<SegmentId> {
        let mut segments: Vec<SegmentId> = self
            .inserts
            .iter()
            .chain(&self.updates)
            .chain(&self.deletes)
            .map(|b| b.segment)
            .chain(self.vacated.iter().copied())
            .collect();
        segments.sort();
        segments.dedup();
        segments
    }
}
