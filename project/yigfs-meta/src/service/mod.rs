//! Metadata API operations.
//!
//! `MetaService` is what the transport layer calls. Each operation validates
//! its request, then runs in one store transaction. Mutations that can lose
//! an optimistic race are retried with backoff; retries that never succeed
//! surface as `Conflict`.
pub mod types;
pub mod validate;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::meta::backoff::backoff;
use crate::meta::config::{Config, MAX_LIST_PAGE_SIZE, ServiceConfig};
use crate::meta::factory::MetaStoreFactory;
use crate::meta::leader;
use crate::meta::store::{
    FileKey, FileRecord, FileType, MetaError, MetaStore, MetaTxn, SegmentId, SegmentRecord,
    ZoneKey,
};
use crate::segment::aggregate::recompute_file_aggregate;
use crate::segment::block::BlockDesc;
use crate::segment::coverage::resolve;
use crate::segment::index::{self, merge_groups};
use crate::utils::now_nanos;

use self::types::*;
use self::validate::{
    DIR_PERM, ROOT_DIR_INO, ROOT_PARENT_DIR_INO, file_type, perm_or_default, region_or, require,
    require_ino,
};

/// Offsets and block ends are persisted as signed 64-bit columns.
const MAX_FILE_OFFSET: u64 = i64::MAX as u64;

#[derive(Clone)]
pub struct MetaService {
    store: Arc<dyn MetaStore>,
    config: ServiceConfig,
}

/// Commit on success, roll back otherwise.
async fn finish<R>(
    txn: Box<dyn MetaTxn>,
    result: Result<R, MetaError>,
    op: &'static str,
) -> Result<R, MetaError> {
    match result {
        Ok(r) => {
            txn.commit().await?;
            Ok(r)
        }
        Err(e) => {
            if let Err(rb) = txn.rollback().await {
                warn!(operation = op, error = %rb, "rollback failed");
            }
            debug!(operation = op, error = %e, "transaction rolled back");
            Err(e)
        }
    }
}

impl MetaService {
    pub fn new(store: Arc<dyn MetaStore>, config: ServiceConfig) -> Self {
        Self { store, config }
    }

    pub async fn from_config(config: Config) -> Result<Self, MetaError> {
        let service = config.service.clone();
        let store = MetaStoreFactory::create_from_config(config).await?;
        Ok(Self::new(store, service))
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn region(&self, region: &str) -> String {
        region_or(region, &self.config.default_region)
    }

    async fn retrying<R, F, Fut>(&self, op: &'static str, f: F) -> Result<R, MetaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, MetaError>>,
    {
        backoff(self.config.max_retries, f)
            .await
            .map_err(|e| match e {
                MetaError::MaxRetriesExceeded | MetaError::ContinueRetry => {
                    warn!(operation = op, "giving up after repeated conflicts");
                    MetaError::Conflict(format!("{op}: concurrent update, retries exhausted"))
                }
                e => e,
            })
    }

    /// Create the "." and ".." entries of a bucket if missing and register
    /// the zone.
    pub async fn init_dir_and_zone(
        &self,
        req: &InitDirRequest,
    ) -> Result<InitDirResponse, MetaError> {
        require("bucket", &req.bucket)?;
        require("zone", &req.zone)?;
        require("machine", &req.machine)?;
        let region = self.region(&req.region);

        let res = self
            .retrying("init dir and zone", || async {
                let txn = self.store.begin().await?;
                let res = init_dirs_in(&*txn, req, &region, now_nanos()).await;
                finish(txn, res, "init dir and zone").await
            })
            .await?;
        info!(region = %region, bucket = %req.bucket, created = ?res.created, "bucket initialized");
        Ok(res)
    }

    /// Create a file or directory together with its leader record. Creating
    /// an existing name returns that file unchanged.
    pub async fn create_file(
        &self,
        req: &CreateFileRequest,
    ) -> Result<CreateFileResponse, MetaError> {
        require("bucket", &req.bucket)?;
        require("name", &req.name)?;
        require_ino("parent_ino", req.parent_ino)?;
        require("zone", &req.zone)?;
        require("machine", &req.machine)?;
        let kind = file_type(req.file_type)?;
        let perm = perm_or_default(req.perm, kind);
        let region = self.region(&req.region);

        let res = self
            .retrying("create file", || async {
                let txn = self.store.begin().await?;
                let res = create_file_in(&*txn, req, &region, kind, perm, now_nanos()).await;
                finish(txn, res, "create file").await
            })
            .await?;
        if res.created {
            info!(file = %res.file.key(), name = %res.file.name, leader = %res.leader, "file created");
        }
        Ok(res)
    }

    pub async fn get_file_attr(&self, req: &FileAttrRequest) -> Result<FileRecord, MetaError> {
        require("bucket", &req.bucket)?;
        require_ino("ino", req.ino)?;
        let key = FileKey::new(self.region(&req.region), req.bucket.clone(), req.ino);

        let txn = self.store.begin().await?;
        let res = txn
            .get_file(&key)
            .await
            .and_then(|f| f.ok_or_else(|| MetaError::NotFound(format!("file {key}"))));
        finish(txn, res, "get file attr").await
    }

    pub async fn get_dir_file_attr(
        &self,
        req: &DirFileAttrRequest,
    ) -> Result<FileRecord, MetaError> {
        require("bucket", &req.bucket)?;
        require("name", &req.name)?;
        let region = self.region(&req.region);

        let txn = self.store.begin().await?;
        let res = txn
            .get_dir_file(&region, &req.bucket, req.parent_ino, &req.name)
            .await
            .and_then(|f| {
                f.ok_or_else(|| {
                    MetaError::NotFound(format!("{} in directory {}", req.name, req.parent_ino))
                })
            });
        finish(txn, res, "get dir file attr").await
    }

    /// Update attributes if the stored generation still equals
    /// `req.generation`; a stale generation fails with `Conflict`.
    pub async fn set_file_attr(&self, req: &SetFileAttrRequest) -> Result<FileRecord, MetaError> {
        require("bucket", &req.bucket)?;
        require_ino("ino", req.ino)?;
        let key = FileKey::new(self.region(&req.region), req.bucket.clone(), req.ino);

        let txn = self.store.begin().await?;
        let res = set_attr_in(&*txn, &key, req, now_nanos()).await;
        finish(txn, res, "set file attr").await
    }

    pub async fn list_dir_files(&self, req: &ListDirRequest) -> Result<ListDirResponse, MetaError> {
        require("bucket", &req.bucket)?;
        let region = self.region(&req.region);
        let limit = match req.limit {
            0 => self.config.list_page_size,
            n => n,
        }
        .clamp(1, MAX_LIST_PAGE_SIZE);

        let txn = self.store.begin().await?;
        let res = txn
            .list_dir_files(&region, &req.bucket, req.parent_ino, req.offset, limit)
            .await;
        let entries = finish(txn, res, "list dir files").await?;

        let next_offset = entries.last().map_or(req.offset, |e| e.ino + 1);
        Ok(ListDirResponse {
            entries,
            next_offset,
        })
    }

    /// The file's leader, assigning the zone's machine if it has none.
    pub async fn get_file_leader(
        &self,
        req: &FileLeaderRequest,
    ) -> Result<FileLeaderResponse, MetaError> {
        require("bucket", &req.bucket)?;
        require("zone", &req.zone)?;
        require("machine", &req.machine)?;
        require_ino("ino", req.ino)?;
        let region = self.region(&req.region);
        let key = FileKey::new(region.clone(), req.bucket.clone(), req.ino);
        let zone = ZoneKey::new(req.zone.clone(), region, req.bucket.clone());

        let leader = self
            .retrying("get file leader", || async {
                let txn = self.store.begin().await?;
                let res = file_leader_in(&*txn, &zone, &key, &req.machine, now_nanos()).await;
                finish(txn, res, "get file leader").await
            })
            .await?;
        Ok(FileLeaderResponse {
            ino: req.ino,
            zone: req.zone.clone(),
            is_leader: leader == req.machine,
            leader,
        })
    }

    pub async fn transfer_file_leader(&self, req: &TransferLeaderRequest) -> Result<(), MetaError> {
        require("bucket", &req.bucket)?;
        require("from", &req.from)?;
        require("to", &req.to)?;
        require_ino("ino", req.ino)?;
        let key = FileKey::new(self.region(&req.region), req.bucket.clone(), req.ino);

        let txn = self.store.begin().await?;
        let res = leader::transfer_file_leader(&*txn, &key, &req.from, &req.to, now_nanos()).await;
        finish(txn, res, "transfer file leader").await
    }

    /// Blocks of the file intersecting `[offset, offset + size)`, grouped by
    /// segment.
    pub async fn get_file_segment_info(
        &self,
        req: &SegmentInfoRequest,
    ) -> Result<SegmentInfoResponse, MetaError> {
        require("bucket", &req.bucket)?;
        require_ino("ino", req.ino)?;
        let key = FileKey::new(self.region(&req.region), req.bucket.clone(), req.ino);
        let end = req
            .size
            .filter(|s| *s > 0)
            .map(|s| req.offset.saturating_add(s).min(MAX_FILE_OFFSET));

        let txn = self.store.begin().await?;
        let res = segment_info_in(&*txn, &key, req.offset, end).await;
        finish(txn, res, "get file segment info").await
    }

    /// The write path: resolve each block against the file's block set, apply
    /// the resulting batches and refresh the file totals, all in one
    /// transaction. Only the file leader may write.
    ///
    /// Cancelling `cancel` or exceeding the configured deadline rolls back an
    /// attempt that has not reached commit. Once commit starts it runs to
    /// completion and its result is returned, so `Cancelled` and `Timeout`
    /// always mean nothing was persisted.
    #[tracing::instrument(
        level = "debug",
        skip(self, req, cancel),
        fields(ino = req.ino, segment = %req.segment, blocks = req.blocks.len())
    )]
    pub async fn update_segment_blocks(
        &self,
        req: &UpdateSegmentBlocksRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateSegmentBlocksResponse, MetaError> {
        require("bucket", &req.bucket)?;
        require("zone", &req.zone)?;
        require("machine", &req.machine)?;
        require_ino("ino", req.ino)?;
        if req.blocks.is_empty() {
            return Err(MetaError::MissingRequiredParams("blocks".to_string()));
        }
        let descs = req.descs();
        for desc in &descs {
            desc.validate()?;
        }
        let region = self.region(&req.region);
        let key = FileKey::new(region.clone(), req.bucket.clone(), req.ino);
        let zone = ZoneKey::new(req.zone.clone(), region, req.bucket.clone());
        let deadline = tokio::time::Instant::now() + self.config.txn_timeout;

        self.retrying("update segment blocks", || async {
            if cancel.is_cancelled() {
                warn!(file = %key, "block update cancelled");
                return Err(MetaError::Cancelled);
            }
            let txn = tokio::time::timeout_at(deadline, self.store.begin())
                .await
                .map_err(|_| self.write_timed_out(&key))??;

            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(file = %key, "block update cancelled");
                    Err(MetaError::Cancelled)
                }
                res = tokio::time::timeout_at(
                    deadline,
                    write_blocks_in(&*txn, &zone, &key, &req.machine, &descs, now_nanos()),
                ) => res.unwrap_or_else(|_| Err(self.write_timed_out(&key))),
            };
            finish(txn, res, "update segment blocks").await
        })
        .await
    }

    fn write_timed_out(&self, key: &FileKey) -> MetaError {
        warn!(file = %key, timeout = ?self.config.txn_timeout, "block update timed out");
        MetaError::Timeout
    }
}

async fn init_dirs_in(
    txn: &dyn MetaTxn,
    req: &InitDirRequest,
    region: &str,
    now: i64,
) -> Result<InitDirResponse, MetaError> {
    let mut created = Vec::new();
    for (ino, name) in [(ROOT_DIR_INO, "."), (ROOT_PARENT_DIR_INO, "..")] {
        let key = FileKey::new(region, req.bucket.clone(), ino);
        if txn.get_file(&key).await?.is_some() {
            continue;
        }
        let dir = FileRecord {
            region: region.to_string(),
            bucket: req.bucket.clone(),
            ino,
            parent_ino: 0,
            name: name.to_string(),
            file_type: FileType::Directory,
            size: 0,
            generation: 0,
            perm: DIR_PERM,
            nlink: 2,
            uid: req.uid,
            gid: req.gid,
            blocks: 0,
            ctime: now,
            mtime: now,
            atime: now,
        };
        txn.insert_file(&dir).await.map_err(retry_on_duplicate)?;
        created.push(ino);
    }

    let zone = ZoneKey::new(req.zone.clone(), region, req.bucket.clone());
    let zone_leader = leader::get_or_assign_zone_leader(txn, &zone, &req.machine, now).await?;
    Ok(InitDirResponse {
        created,
        zone_leader,
    })
}

async fn create_file_in(
    txn: &dyn MetaTxn,
    req: &CreateFileRequest,
    region: &str,
    kind: FileType,
    perm: u32,
    now: i64,
) -> Result<CreateFileResponse, MetaError> {
    let zone = ZoneKey::new(req.zone.clone(), region, req.bucket.clone());

    if let Some(existing) = txn
        .get_dir_file(region, &req.bucket, req.parent_ino, &req.name)
        .await?
    {
        let leader =
            leader::get_or_create_file_leader(txn, &zone, &existing.key(), &req.machine, now)
                .await?;
        return Ok(CreateFileResponse {
            file: existing,
            leader,
            created: false,
        });
    }

    let parent_key = FileKey::new(region, req.bucket.clone(), req.parent_ino);
    let parent = txn
        .get_file(&parent_key)
        .await?
        .ok_or_else(|| MetaError::NotFound(format!("parent directory {parent_key}")))?;
    if parent.file_type != FileType::Directory {
        return Err(MetaError::InvalidArgument(format!(
            "parent {parent_key} is not a directory"
        )));
    }

    let ino = allocate_ino(txn, region, &req.bucket).await?;
    let file = FileRecord {
        region: region.to_string(),
        bucket: req.bucket.clone(),
        ino,
        parent_ino: req.parent_ino,
        name: req.name.clone(),
        file_type: kind,
        size: 0,
        generation: 0,
        perm,
        nlink: if kind == FileType::Directory { 2 } else { 1 },
        uid: req.uid,
        gid: req.gid,
        blocks: 0,
        ctime: now,
        mtime: now,
        atime: now,
    };
    txn.insert_file(&file).await.map_err(retry_on_duplicate)?;

    leader::get_or_assign_zone_leader(txn, &zone, &req.machine, now).await?;
    let leader = leader::assign_file_leader(txn, &zone, &file.key(), &req.machine, now).await?;
    Ok(CreateFileResponse {
        file,
        leader,
        created: true,
    })
}

/// Take the next ino of a namespace. Inos up to the bootstrap directories
/// are never handed out.
async fn allocate_ino(txn: &dyn MetaTxn, region: &str, bucket: &str) -> Result<i64, MetaError> {
    let current = txn.read_ino_counter(region, bucket).await?;
    let next = current.unwrap_or(ROOT_PARENT_DIR_INO).max(ROOT_PARENT_DIR_INO) + 1;
    if !txn.swap_ino_counter(region, bucket, current, next).await? {
        return Err(MetaError::ContinueRetry);
    }
    Ok(next)
}

// A concurrent creator inserted the same identity first; rerun and read it.
fn retry_on_duplicate(e: MetaError) -> MetaError {
    match e {
        MetaError::AlreadyExists(_) => MetaError::ContinueRetry,
        e => e,
    }
}

async fn set_attr_in(
    txn: &dyn MetaTxn,
    key: &FileKey,
    req: &SetFileAttrRequest,
    now: i64,
) -> Result<FileRecord, MetaError> {
    let file = txn
        .get_file(key)
        .await?
        .ok_or_else(|| MetaError::NotFound(format!("file {key}")))?;
    if file.generation != req.generation {
        return Err(MetaError::Conflict(format!(
            "file {key} is at generation {}, not {}",
            file.generation, req.generation
        )));
    }

    let time = |t: Option<i64>, current: i64| match t {
        Some(0) => now,
        Some(t) => t,
        None => current,
    };
    let updated = FileRecord {
        perm: req.perm.unwrap_or(file.perm),
        uid: req.uid.unwrap_or(file.uid),
        gid: req.gid.unwrap_or(file.gid),
        nlink: req.nlink.unwrap_or(file.nlink),
        atime: time(req.atime, file.atime),
        mtime: time(req.mtime, file.mtime),
        ctime: time(req.ctime.or(Some(0)), file.ctime),
        generation: file.generation + 1,
        ..file
    };
    if !txn.update_file(&updated, req.generation).await? {
        return Err(MetaError::Conflict(format!(
            "file {key} changed concurrently"
        )));
    }
    Ok(updated)
}

async fn file_leader_in(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    key: &FileKey,
    machine: &str,
    now: i64,
) -> Result<String, MetaError> {
    if txn.get_file(key).await?.is_none() {
        return Err(MetaError::NotFound(format!("file {key}")));
    }
    leader::get_or_create_file_leader(txn, zone, key, machine, now).await
}

async fn segment_info_in(
    txn: &dyn MetaTxn,
    key: &FileKey,
    offset: u64,
    end: Option<u64>,
) -> Result<SegmentInfoResponse, MetaError> {
    if txn.get_file(key).await?.is_none() {
        return Err(MetaError::NotFound(format!("file {key}")));
    }
    // No block reaches past the largest storable offset.
    if offset >= MAX_FILE_OFFSET {
        return Ok(SegmentInfoResponse {
            segments: Vec::new(),
        });
    }

    let including = index::segments_including_offset(txn, key, offset).await?;
    let after = index::segments_after_offset(txn, key, offset, end).await?;

    let mut segments = Vec::new();
    for group in merge_groups(including, after) {
        let blocks = txn.blocks_at(key, group.segment, &group.positions).await?;
        let leader = txn
            .get_segment(key, group.segment)
            .await?
            .map(|s| s.leader)
            .unwrap_or_default();
        segments.push(SegmentInfo {
            segment: group.segment,
            leader,
            blocks: blocks.iter().map(BlockInfo::from).collect(),
        });
    }
    Ok(SegmentInfoResponse { segments })
}

async fn write_blocks_in(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    key: &FileKey,
    machine: &str,
    descs: &[BlockDesc],
    now: i64,
) -> Result<UpdateSegmentBlocksResponse, MetaError> {
    let file = txn
        .get_file(key)
        .await?
        .ok_or_else(|| MetaError::NotFound(format!("file {key}")))?;
    if file.file_type == FileType::Directory {
        return Err(MetaError::InvalidArgument(format!(
            "{key} is a directory"
        )));
    }
    leader::ensure_file_leader(txn, zone, key, machine, now).await?;

    let mut touched: Vec<SegmentId> = Vec::new();
    let mut outcomes = Vec::with_capacity(descs.len());
    for desc in descs {
        ensure_segment(txn, key, desc, machine).await?;

        let existing = index::overlapping_blocks(txn, key, desc.offset, desc.end()).await?;
        let adjacent = if existing.is_empty() {
            txn.block_ending_at(key, desc.segment, desc.offset).await?
        } else {
            None
        };
        let resolution = resolve(key, desc, &existing, adjacent.as_ref(), now);
        debug!(
            offset = desc.offset,
            size = desc.size,
            outcome = ?resolution.outcome,
            inserts = resolution.batch.inserts.len(),
            updates = resolution.batch.updates.len(),
            deletes = resolution.batch.deletes.len(),
            "block resolved"
        );

        if !resolution.batch.is_empty() {
            touched.extend(resolution.batch.touched_segments());
            txn.apply_block_batch(&resolution.batch).await?;
        }
        outcomes.push(resolution.outcome);
    }

    touched.sort();
    touched.dedup();
    for segment in touched {
        index::refresh_segment_range(txn, key, segment).await?;
    }

    let file = recompute_file_aggregate(txn, &file, now).await?;
    Ok(UpdateSegmentBlocksResponse { file, outcomes })
}

/// Segments are created on first write, led by the writing machine.
async fn ensure_segment(
    txn: &dyn MetaTxn,
    key: &FileKey,
    desc: &BlockDesc,
    machine: &str,
) -> Result<(), MetaError> {
    if txn.get_segment(key, desc.segment).await?.is_some() {
        return Ok(());
    }
    let segment = SegmentRecord {
        file: key.clone(),
        id: desc.segment,
        leader: machine.to_string(),
        start_offset: desc.offset,
        end_offset: desc.end(),
    };
    txn.insert_segment(&segment)
        .await
        .map_err(retry_on_duplicate)
}
