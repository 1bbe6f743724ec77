//! Block writes that lose the file generation race and are retried

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use yigfs_meta::meta::store::{DirEntry, FileLeaderRecord, SegmentRecord, ZoneRecord};
use yigfs_meta::segment::BlockBatch;
use yigfs_meta::service::types::*;
use yigfs_meta::service::validate::ROOT_DIR_INO;
use yigfs_meta::{
    BlockRecord, FileKey, FileRecord, MetaError, MetaService, MetaStore, MetaTxn, SegmentId,
    ServiceConfig, WriteOutcome, ZoneKey, create_meta_store_from_url,
};

const BUCKET: &str = "logs";
const ZONE: &str = "zone-c";
const M1: &str = "10.2.0.1";
const MAX_RETRIES: u64 = 4;

const SEG_A: SegmentId = SegmentId { id0: 0xa, id1: 3 };
const SEG_B: SegmentId = SegmentId { id0: 0xb, id1: 4 };

/// A store whose file compare-and-swap fails while `misses` is positive, as
/// if another writer bumped the generation in between. When `cancel_on_commit`
/// holds a token, committing cancels it first.
struct RacingStore {
    inner: Arc<dyn MetaStore>,
    misses: Arc<AtomicU32>,
    cancel_on_commit: Arc<Mutex<Option<CancellationToken>>>,
}

struct RacingTxn {
    inner: Box<dyn MetaTxn>,
    misses: Arc<AtomicU32>,
    cancel_on_commit: Option<CancellationToken>,
}

#[async_trait]
impl MetaStore for RacingStore {
    async fn begin(&self) -> Result<Box<dyn MetaTxn>, MetaError> {
        let cancel_on_commit = self.cancel_on_commit.lock().unwrap().clone();
        Ok(Box::new(RacingTxn {
            inner: self.inner.begin().await?,
            misses: self.misses.clone(),
            cancel_on_commit,
        }))
    }
}

#[async_trait]
impl MetaTxn for RacingTxn {
    async fn get_file(&self, key: &FileKey) -> Result<Option<FileRecord>, MetaError> {
        self.inner.get_file(key).await
    }

    async fn get_dir_file(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        name: &str,
    ) -> Result<Option<FileRecord>, MetaError> {
        self.inner.get_dir_file(region, bucket, parent_ino, name).await
    }

    async fn list_dir_files(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        offset: i64,
        limit: u64,
    ) -> Result<Vec<DirEntry>, MetaError> {
        self.inner
            .list_dir_files(region, bucket, parent_ino, offset, limit)
            .await
    }

    async fn read_ino_counter(&self, region: &str, bucket: &str) -> Result<Option<i64>, MetaError> {
        self.inner.read_ino_counter(region, bucket).await
    }

    async fn swap_ino_counter(
        &self,
        region: &str,
        bucket: &str,
        current: Option<i64>,
        next: i64,
    ) -> Result<bool, MetaError> {
        self.inner
            .swap_ino_counter(region, bucket, current, next)
            .await
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<(), MetaError> {
        self.inner.insert_file(file).await
    }

    async fn update_file(
        &self,
        file: &FileRecord,
        expected_generation: u64,
    ) -> Result<bool, MetaError> {
        let lost = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner.update_file(file, expected_generation).await
    }

    async fn get_zone(&self, key: &ZoneKey) -> Result<Option<ZoneRecord>, MetaError> {
        self.inner.get_zone(key).await
    }

    async fn insert_zone(&self, zone: &ZoneRecord) -> Result<(), MetaError> {
        self.inner.insert_zone(zone).await
    }

    async fn touch_zone(&self, key: &ZoneKey, now: i64) -> Result<(), MetaError> {
        self.inner.touch_zone(key, now).await
    }

    async fn get_file_leader(
        &self,
        file: &FileKey,
    ) -> Result<Option<FileLeaderRecord>, MetaError> {
        self.inner.get_file_leader(file).await
    }

    async fn insert_file_leader(&self, leader: &FileLeaderRecord) -> Result<(), MetaError> {
        self.inner.insert_file_leader(leader).await
    }

    async fn swap_file_leader(
        &self,
        file: &FileKey,
        expected: &str,
        machine: &str,
        now: i64,
    ) -> Result<bool, MetaError> {
        self.inner
            .swap_file_leader(file, expected, machine, now)
            .await
    }

    async fn get_segment(
        &self,
        file: &FileKey,
        id: SegmentId,
    ) -> Result<Option<SegmentRecord>, MetaError> {
        self.inner.get_segment(file, id).await
    }

    async fn insert_segment(&self, segment: &SegmentRecord) -> Result<(), MetaError> {
        self.inner.insert_segment(segment).await
    }

    async fn update_segment_range(
        &self,
        file: &FileKey,
        id: SegmentId,
        start_offset: u64,
        end_offset: u64,
    ) -> Result<(), MetaError> {
        self.inner
            .update_segment_range(file, id, start_offset, end_offset)
            .await
    }

    async fn blocks_including(
        &self,
        file: &FileKey,
        at: u64,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        self.inner.blocks_including(file, at).await
    }

    async fn blocks_from(
        &self,
        file: &FileKey,
        from: u64,
        before: Option<u64>,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        self.inner.blocks_from(file, from, before).await
    }

    async fn blocks_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        positions: &[u64],
    ) -> Result<Vec<BlockRecord>, MetaError> {
        self.inner.blocks_at(file, segment, positions).await
    }

    async fn segment_blocks(
        &self,
        file: &FileKey,
        segment: SegmentId,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        self.inner.segment_blocks(file, segment).await
    }

    async fn block_ending_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        end: u64,
    ) -> Result<Option<BlockRecord>, MetaError> {
        self.inner.block_ending_at(file, segment, end).await
    }

    async fn file_blocks(&self, file: &FileKey) -> Result<Vec<BlockRecord>, MetaError> {
        self.inner.file_blocks(file).await
    }

    async fn apply_block_batch(&self, batch: &BlockBatch) -> Result<(), MetaError> {
        self.inner.apply_block_batch(batch).await
    }

    async fn commit(self: Box<Self>) -> Result<(), MetaError> {
        let this = *self;
        if let Some(token) = &this.cancel_on_commit {
            token.cancel();
        }
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), MetaError> {
        self.inner.rollback().await
    }
}

struct Harness {
    service: MetaService,
    misses: Arc<AtomicU32>,
    cancel_on_commit: Arc<Mutex<Option<CancellationToken>>>,
    file: FileRecord,
}

async fn setup() -> Harness {
    let misses = Arc::new(AtomicU32::new(0));
    let cancel_on_commit = Arc::new(Mutex::new(None));
    let store = RacingStore {
        inner: create_meta_store_from_url("sqlite::memory:").await.unwrap(),
        misses: misses.clone(),
        cancel_on_commit: cancel_on_commit.clone(),
    };
    let config = ServiceConfig {
        max_retries: MAX_RETRIES,
        ..Default::default()
    };
    let service = MetaService::new(Arc::new(store), config);
    service
        .init_dir_and_zone(&InitDirRequest {
            bucket: BUCKET.into(),
            zone: ZONE.into(),
            machine: M1.into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let file = service
        .create_file(&CreateFileRequest {
            bucket: BUCKET.into(),
            zone: ZONE.into(),
            machine: M1.into(),
            parent_ino: ROOT_DIR_INO,
            name: "app.log".into(),
            ..Default::default()
        })
        .await
        .unwrap()
        .file;
    Harness {
        service,
        misses,
        cancel_on_commit,
        file,
    }
}

async fn write(
    service: &MetaService,
    ino: i64,
    segment: SegmentId,
    offset: u64,
    size: u64,
) -> Result<UpdateSegmentBlocksResponse, MetaError> {
    service
        .update_segment_blocks(
            &UpdateSegmentBlocksRequest {
                bucket: BUCKET.into(),
                zone: ZONE.into(),
                machine: M1.into(),
                ino,
                segment,
                blocks: vec![BlockInfo {
                    offset,
                    size,
                    seg_start_addr: 0,
                    seg_end_addr: size,
                }],
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
}

async fn state(service: &MetaService, ino: i64) -> (FileRecord, Vec<(SegmentId, u64, u64)>) {
    let file = service
        .get_file_attr(&FileAttrRequest {
            bucket: BUCKET.into(),
            ino,
            ..Default::default()
        })
        .await
        .unwrap();
    let info = service
        .get_file_segment_info(&SegmentInfoRequest {
            bucket: BUCKET.into(),
            ino,
            ..Default::default()
        })
        .await
        .unwrap();
    let mut blocks: Vec<_> = info
        .segments
        .iter()
        .flat_map(|s| s.blocks.iter().map(|b| (s.segment, b.offset, b.size)))
        .collect();
    blocks.sort_by_key(|b| b.1);
    (file, blocks)
}

#[tokio::test]
async fn test_lost_generation_race_is_retried() {
    let Harness {
        service,
        misses,
        file,
        ..
    } = setup().await;
    write(&service, file.ino, SEG_A, 0, 100).await.unwrap();

    misses.store(MAX_RETRIES as u32 - 1, Ordering::SeqCst);
    let res = write(&service, file.ino, SEG_B, 50, 100).await.unwrap();
    assert_eq!(misses.load(Ordering::SeqCst), 0);
    assert_eq!(res.outcomes, vec![WriteOutcome::Inserted]);

    // every failed attempt rolled back, so the partial overlap was trimmed once
    let (stored, blocks) = state(&service, file.ino).await;
    assert_eq!(blocks, vec![(SEG_A, 0, 50), (SEG_B, 50, 100)]);
    assert_eq!(stored.generation, file.generation + 2);
    assert_eq!(stored.size, 150);
    assert_eq!(stored.blocks, 2);
    assert_eq!(res.file, stored);
}

#[tokio::test]
async fn test_exhausted_retries_surface_as_conflict() {
    let Harness {
        service,
        misses,
        file,
        ..
    } = setup().await;
    write(&service, file.ino, SEG_A, 0, 100).await.unwrap();
    let before = state(&service, file.ino).await;

    misses.store(MAX_RETRIES as u32, Ordering::SeqCst);
    let err = write(&service, file.ino, SEG_B, 50, 100).await.unwrap_err();
    assert!(matches!(err, MetaError::Conflict(_)), "{err:?}");
    assert_eq!(misses.load(Ordering::SeqCst), 0);

    assert_eq!(state(&service, file.ino).await, before);
}

#[tokio::test]
async fn test_cancel_during_commit_reports_the_committed_write() {
    let Harness {
        service,
        cancel_on_commit,
        file,
        ..
    } = setup().await;
    let cancel = CancellationToken::new();
    *cancel_on_commit.lock().unwrap() = Some(cancel.clone());

    let res = service
        .update_segment_blocks(
            &UpdateSegmentBlocksRequest {
                bucket: BUCKET.into(),
                zone: ZONE.into(),
                machine: M1.into(),
                ino: file.ino,
                segment: SEG_A,
                blocks: vec![BlockInfo {
                    offset: 0,
                    size: 64,
                    seg_start_addr: 0,
                    seg_end_addr: 64,
                }],
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(cancel.is_cancelled());
    assert_eq!(res.outcomes, vec![WriteOutcome::Inserted]);

    *cancel_on_commit.lock().unwrap() = None;
    let (stored, blocks) = state(&service, file.ino).await;
    assert_eq!(blocks, vec![(SEG_A, 0, 64)]);
    assert_eq!(stored, res.file);
}
