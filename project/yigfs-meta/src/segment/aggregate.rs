use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::meta::store::{FileRecord, MetaError, MetaTxn};
use crate::segment::block::BlockRecord;
use crate::utils::intervals::union_len;

/// File-level totals derived from the block set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAggregate {
    /// Distinct bytes covered by blocks.
    pub size: u64,
    pub blocks: u64,
}

pub fn aggregate(blocks: &[BlockRecord]) -> FileAggregate {
    FileAggregate {
        size: union_len(blocks.iter().map(BlockRecord::range)),
        blocks: blocks.len() as u64,
    }
}

/// Recompute size and block count of `file` from its persisted blocks and
/// store them, bumping the generation.
///
/// `file` is the snapshot the caller read in this transaction. If another
/// writer changed the record since, the update matches no row and the
/// caller gets [`MetaError::ContinueRetry`].
pub async fn recompute_file_aggregate(
    txn: &dyn MetaTxn,
    file: &FileRecord,
    now: i64,
) -> Result<FileRecord, MetaError> {
    let blocks = txn.file_blocks(&file.key()).await?;
    let totals = aggregate(&blocks);

    let updated = FileRecord {
        size: totals.size,
        blocks: totals.blocks,
        generation: file.generation + 1,
        mtime: now,
        ctime: now,
        ..file.clone()
    };
    if !txn.update_file(&updated, file.generation).await? {
        debug!(file = %file.key(), generation = file.generation, "aggregate update lost race");
        return Err(MetaError::ContinueRetry);
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::store::{FileKey, SegmentId};

    fn block(offset: u64, size: u64) -> BlockRecord {
        BlockRecord {
            id: 0,
            file: FileKey::new("r", "b", 3),
            segment: SegmentId::new(1, 1),
            offset,
            size,
            seg_start_addr: 0,
            seg_end_addr: size,
            updated_at: 0,
        }
    }

    #[test]
    fn test_aggregate_counts_distinct_bytes() {
        assert_eq!(aggregate(&[]), FileAggregate::default());
        assert_eq!(
            aggregate(&[block(0, 100), block(200, 50)]),
            FileAggregate { size: 150, blocks: 2 }
        );
        // residual overlap is not double counted
        assert_eq!(
            aggregate(&[block(0, 100), block(50, 100)]),
            FileAggregate { size: 150, blocks: 2 }
        );
    }
}
