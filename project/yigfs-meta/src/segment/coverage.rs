//! Block coverage resolution.
//!
//! Classifies an incoming write against the persisted blocks it intersects
//! and produces the batch that keeps a file's block set minimal:
//!
//! - same range as an existing block: the block is repointed at the new bytes;
//! - inside an existing block: the write is already covered and dropped;
//! - covering an existing block: that block is deleted;
//! - partially overlapping: the existing block is trimmed to the part the
//!   write does not touch, its segment address shifted to match.
//!
//! Afterwards no two blocks of a file overlap. A write touching nothing is
//! inserted, or folded into the block of the same segment it directly
//! continues.
use serde::{Deserialize, Serialize};

use crate::meta::store::FileKey;
use crate::segment::block::{BlockBatch, BlockDesc, BlockRecord};
use crate::utils::intervals::Intervals;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Persisted as a new block.
    Inserted,
    /// An existing block with the same range now points at the new bytes.
    Replaced,
    /// Already shadowed by an existing block; nothing changed.
    Covered,
    /// Extended the preceding block of the same segment.
    Appended,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: WriteOutcome,
    pub batch: BlockBatch,
}

/// Resolve `write` against `existing`, the persisted blocks of the file that
/// may intersect it. `adjacent` is the block of the write's segment ending
/// exactly at `write.offset`, if any.
pub fn resolve(
    file: &FileKey,
    write: &BlockDesc,
    existing: &[BlockRecord],
    adjacent: Option<&BlockRecord>,
    now: i64,
) -> Resolution {
    let (w_l, w_r) = (write.offset, write.end());
    let overlapping: Vec<&BlockRecord> = existing
        .iter()
        .filter(|e| e.intersects(w_l, w_r))
        .collect();
    let exact = overlapping
        .iter()
        .find(|e| e.offset == w_l && e.size == write.size)
        .map(|e| e.id);

    if exact.is_none() && overlapping.iter().any(|e| e.offset <= w_l && e.end() >= w_r) {
        return Resolution {
            outcome: WriteOutcome::Covered,
            batch: BlockBatch::default(),
        };
    }

    let mut batch = BlockBatch::default();
    for e in &overlapping {
        if Some(e.id) == exact {
            if e.segment != write.segment {
                batch.vacated.push(e.segment);
            }
            batch.updates.push(BlockRecord {
                segment: write.segment,
                seg_start_addr: write.seg_start_addr,
                seg_end_addr: write.seg_end_addr,
                updated_at: now,
                ..(*e).clone()
            });
            continue;
        }

        let mut rest = Intervals::new(e.offset, e.end());
        rest.cut(w_l, w_r);
        let mut pieces = rest.collect().into_iter();
        match pieces.next() {
            None => batch.deletes.push((*e).clone()),
            Some((l, r)) => {
                batch.updates.push(trimmed(e, l, r));
                // Only a block strictly containing the write leaves a second
                // piece, which a disjoint block set never has.
                for (l, r) in pieces {
                    batch.inserts.push(BlockRecord {
                        id: 0,
                        ..trimmed(e, l, r)
                    });
                }
            }
        }
    }

    if exact.is_some() {
        return Resolution {
            outcome: WriteOutcome::Replaced,
            batch,
        };
    }

    if overlapping.is_empty() {
        if let Some(prev) = adjacent.filter(|a| continues(a, write)) {
            batch.updates.push(BlockRecord {
                size: prev.size + write.size,
                seg_end_addr: write.seg_end_addr,
                updated_at: now,
                ..prev.clone()
            });
            return Resolution {
                outcome: WriteOutcome::Appended,
                batch,
            };
        }
    }

    batch.inserts.push(BlockRecord::from_desc(file, write, now));
    Resolution {
        outcome: WriteOutcome::Inserted,
        batch,
    }
}

/// `e` restricted to `[l, r)`, keeping the bytes it already pointed at.
fn trimmed(e: &BlockRecord, l: u64, r: u64) -> BlockRecord {
    let seg_start_addr = e.seg_start_addr + (l - e.offset);
    BlockRecord {
        offset: l,
        size: r - l,
        seg_start_addr,
        seg_end_addr: seg_start_addr + (r - l),
        ..e.clone()
    }
}

fn continues(prev: &BlockRecord, write: &BlockDesc) -> bool {
    prev.segment == write.segment
        && prev.end() == write.offset
        && prev.seg_end_addr == write.seg_start_addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::store::SegmentId;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SEG_A: SegmentId = SegmentId { id0: 1, id1: 1 };
    const SEG_B: SegmentId = SegmentId { id0: 2, id1: 2 };

    fn key() -> FileKey {
        FileKey::new("cn-bj-1", "bucket", 3)
    }

    fn write(segment: SegmentId, offset: u64, size: u64, addr: u64) -> BlockDesc {
        BlockDesc {
            segment,
            offset,
            size,
            seg_start_addr: addr,
            seg_end_addr: addr + size,
        }
    }

    fn block(id: i64, segment: SegmentId, offset: u64, size: u64, addr: u64) -> BlockRecord {
        BlockRecord {
            id,
            file: key(),
            segment,
            offset,
            size,
            seg_start_addr: addr,
            seg_end_addr: addr + size,
            updated_at: 1,
        }
    }

    /// Applies a batch to an in-memory block set the way the store does.
    fn apply(blocks: &mut Vec<BlockRecord>, next_id: &mut i64, batch: BlockBatch) {
        blocks.retain(|b| !batch.deletes.iter().any(|d| d.id == b.id));
        for u in batch.updates {
            let slot = blocks.iter_mut().find(|b| b.id == u.id).unwrap();
            *slot = u;
        }
        for mut i in batch.inserts {
            *next_id += 1;
            i.id = *next_id;
            blocks.push(i);
        }
    }

    #[test]
    fn test_exact_match_replaces_location() {
        let existing = [block(7, SEG_A, 0, 100, 0)];
        let res = resolve(&key(), &write(SEG_B, 0, 100, 500), &existing, None, 9);

        assert_eq!(res.outcome, WriteOutcome::Replaced);
        assert!(res.batch.inserts.is_empty());
        assert!(res.batch.deletes.is_empty());
        assert_eq!(res.batch.updates.len(), 1);
        let u = &res.batch.updates[0];
        assert_eq!((u.id, u.offset, u.size), (7, 0, 100));
        assert_eq!(u.segment, SEG_B);
        assert_eq!((u.seg_start_addr, u.seg_end_addr), (500, 600));
        assert_eq!(u.updated_at, 9);
        assert_eq!(res.batch.vacated, vec![SEG_A]);
        assert_eq!(res.batch.touched_segments(), vec![SEG_A, SEG_B]);

        // same segment: nothing is vacated
        let res = resolve(&key(), &write(SEG_A, 0, 100, 500), &existing, None, 9);
        assert!(res.batch.vacated.is_empty());
    }

    #[test]
    fn test_write_inside_existing_is_covered() {
        let existing = [block(1, SEG_A, 0, 200, 0)];
        let res = resolve(&key(), &write(SEG_A, 50, 50, 200), &existing, None, 2);
        assert_eq!(res.outcome, WriteOutcome::Covered);
        assert!(res.batch.is_empty());

        let res = resolve(&key(), &write(SEG_A, 0, 10, 200), &existing, None, 2);
        assert_eq!(res.outcome, WriteOutcome::Covered);
    }

    #[test]
    fn test_write_covering_existing_deletes_it() {
        let existing = [block(1, SEG_A, 0, 50, 0)];
        let res = resolve(&key(), &write(SEG_A, 0, 200, 50), &existing, None, 2);

        assert_eq!(res.outcome, WriteOutcome::Inserted);
        assert_eq!(res.batch.deletes.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(res.batch.inserts.len(), 1);
        assert_eq!(res.batch.inserts[0].range(), (0, 200));
    }

    #[test]
    fn test_partial_overlap_trims_tail_and_head() {
        let existing = [block(1, SEG_A, 0, 100, 1000), block(2, SEG_A, 150, 100, 2000)];
        let res = resolve(&key(), &write(SEG_B, 80, 100, 0), &existing, None, 5);

        assert_eq!(res.outcome, WriteOutcome::Inserted);
        assert!(res.batch.deletes.is_empty());
        let mut updates = res.batch.updates.clone();
        updates.sort_by_key(|b| b.id);

        assert_eq!(updates[0].range(), (0, 80));
        assert_eq!((updates[0].seg_start_addr, updates[0].seg_end_addr), (1000, 1080));
        assert_eq!(updates[1].range(), (180, 250));
        assert_eq!((updates[1].seg_start_addr, updates[1].seg_end_addr), (2030, 2100));
        assert_eq!(updates[1].updated_at, 1);
        assert_eq!(res.batch.inserts[0].range(), (80, 180));
    }

    #[test]
    fn test_write_spanning_several_blocks() {
        let existing = [
            block(1, SEG_A, 0, 10, 0),
            block(2, SEG_A, 10, 10, 10),
            block(3, SEG_A, 20, 10, 20),
        ];
        let res = resolve(&key(), &write(SEG_B, 5, 20, 0), &existing, None, 2);

        assert_eq!(res.batch.deletes.iter().map(|b| b.id).collect::<Vec<_>>(), vec![2]);
        let mut trimmed: Vec<_> = res.batch.updates.iter().map(|b| (b.id, b.range())).collect();
        trimmed.sort();
        assert_eq!(trimmed, vec![(1, (0, 5)), (3, (25, 30))]);
    }

    #[test]
    fn test_sequential_write_extends_previous_block() {
        let prev = block(4, SEG_A, 0, 100, 0);
        let res = resolve(&key(), &write(SEG_A, 100, 50, 100), &[], Some(&prev), 3);

        assert_eq!(res.outcome, WriteOutcome::Appended);
        assert!(res.batch.inserts.is_empty());
        let u = &res.batch.updates[0];
        assert_eq!((u.id, u.range()), (4, (0, 150)));
        assert_eq!((u.seg_start_addr, u.seg_end_addr), (0, 150));
    }

    #[test]
    fn test_non_contiguous_bytes_are_not_appended() {
        let prev = block(4, SEG_A, 0, 100, 0);
        let res = resolve(&key(), &write(SEG_A, 100, 50, 300), &[], Some(&prev), 3);
        assert_eq!(res.outcome, WriteOutcome::Inserted);

        let res = resolve(&key(), &write(SEG_B, 100, 50, 100), &[], Some(&prev), 3);
        assert_eq!(res.outcome, WriteOutcome::Inserted);
    }

    #[test]
    fn test_random_writes_keep_blocks_disjoint() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut blocks = Vec::new();
        let mut next_id = 0;
        let mut addr = 0;

        for round in 0..500 {
            let offset = rng.random_range(0..400u64);
            let size = rng.random_range(1..80u64);
            let seg = if rng.random_bool(0.5) { SEG_A } else { SEG_B };
            let w = write(seg, offset, size, addr);
            addr += size;

            let adjacent = blocks
                .iter()
                .find(|b: &&BlockRecord| b.segment == seg && b.end() == offset)
                .cloned();
            let res = resolve(&key(), &w, &blocks, adjacent.as_ref(), round);
            apply(&mut blocks, &mut next_id, res.batch);

            let mut sorted = blocks.clone();
            sorted.sort_by_key(|b| b.offset);
            for pair in sorted.windows(2) {
                assert!(pair[0].end() <= pair[1].offset, "overlap after round {round}");
            }
            for b in &blocks {
                assert!(b.size > 0);
                assert_eq!(b.seg_end_addr - b.seg_start_addr, b.size);
            }
            assert!(
                blocks
                    .iter()
                    .any(|b| b.offset <= offset && b.end() >= offset + size),
                "write at round {round} is not covered"
            );
        }
    }
}
