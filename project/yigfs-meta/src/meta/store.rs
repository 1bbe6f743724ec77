//! Metadata store abstract interface
//!
//! Defines the transactional persistence contract consumed by the leadership,
//! segment and service layers. One logical operation maps to one [`MetaTxn`];
//! dropping a transaction without committing rolls it back.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::segment::block::{BlockBatch, BlockRecord};

/// Identity of a file inside a region/bucket namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
}

impl FileKey {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>, ino: i64) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            ino,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.bucket, self.ino)
    }
}

/// Identity of a zone record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneKey {
    pub zone_id: String,
    pub region: String,
    pub bucket: String,
}

impl ZoneKey {
    pub fn new(
        zone_id: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            region: region.into(),
            bucket: bucket.into(),
        }
    }
}

/// Segment identifier, stored as the two 64-bit halves of a UUID.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SegmentId {
    pub id0: u64,
    pub id1: u64,
}

impl SegmentId {
    pub fn new(id0: u64, id1: u64) -> Self {
        Self { id0, id1 }
    }

    /// Allocate a fresh random segment id.
    pub fn generate() -> Self {
        let (id0, id1) = uuid::Uuid::new_v4().as_u64_pair();
        Self { id0, id1 }
    }

    // Columns are signed; the halves round-trip bit for bit.
    pub(crate) fn to_columns(self) -> (i64, i64) {
        (self.id0 as i64, self.id1 as i64)
    }

    pub(crate) fn from_columns(id0: i64, id1: i64) -> Self {
        Self {
            id0: id0 as u64,
            id1: id1 as u64,
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.id0, self.id1)
    }
}

/// File type enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Regular,
    Directory,
}

impl FileType {
    pub fn code(self) -> i32 {
        match self {
            FileType::Regular => 1,
            FileType::Directory => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, MetaError> {
        match code {
            1 => Ok(FileType::Regular),
            2 => Ok(FileType::Directory),
            other => Err(MetaError::InvalidType(other)),
        }
    }
}

/// Persisted file attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub parent_ino: i64,
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub generation: u64,
    pub perm: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blocks: u64,
    pub ctime: i64,
    pub mtime: i64,
    pub atime: i64,
}

impl FileRecord {
    pub fn key(&self) -> FileKey {
        FileKey::new(self.region.clone(), self.bucket.clone(), self.ino)
    }
}

/// Directory listing entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub ino: i64,
    pub name: String,
    pub file_type: FileType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub key: ZoneKey,
    pub machine: String,
    pub updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLeaderRecord {
    pub file: FileKey,
    pub zone_id: String,
    pub machine: String,
    pub updated_at: i64,
}

/// A logical subdivision of a file's address space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub file: FileKey,
    pub id: SegmentId,
    pub leader: String,
    pub start_offset: u64,
    pub end_offset: u64,
}

/// Coarse classification used by the transport layer to pick a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MissingRequiredParams,
    InvalidArgument,
    NotFound,
    Conflict,
    NotLeader,
    Cancelled,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("missing required params: {0}")]
    MissingRequiredParams(String),

    #[error("invalid file type: {0}")]
    InvalidType(i32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("file {ino} is led by {leader}")]
    NotLeader { ino: i64, leader: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("transaction timed out")]
    Timeout,

    #[error("Config error: {0}")]
    Config(String),

    #[error("continue retry")]
    ContinueRetry,

    #[error("error: max retries exceeded")]
    MaxRetriesExceeded,
}

impl MetaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetaError::MissingRequiredParams(_) => ErrorKind::MissingRequiredParams,
            MetaError::InvalidType(_) | MetaError::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            MetaError::NotFound(_) => ErrorKind::NotFound,
            MetaError::AlreadyExists(_)
            | MetaError::Conflict(_)
            | MetaError::ContinueRetry
            | MetaError::MaxRetriesExceeded => ErrorKind::Conflict,
            MetaError::NotLeader { .. } => ErrorKind::NotLeader,
            MetaError::Cancelled | MetaError::Timeout => ErrorKind::Cancelled,
            MetaError::Internal(_) | MetaError::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Transactional metadata backend.
///
/// Implementations hand out independent transactions; all reads and writes
/// of one logical operation go through the same [`MetaTxn`] so the operation
/// observes one snapshot and commits atomically.
#[async_trait]
#[auto_impl::auto_impl(&, std::sync::Arc)]
pub trait MetaStore: Send + Sync {
    /// Human readable backend name (for diagnostics and logging)
    fn name(&self) -> &'static str {
        "meta-store"
    }

    async fn begin(&self) -> Result<Box<dyn MetaTxn>, MetaError>;
}

/// One open transaction against the backing store.
///
/// Lookups return `Ok(None)` when no row matches; `Err` is reserved for
/// backend failures. Inserts of an identity that already exists fail with
/// [`MetaError::AlreadyExists`]. Compare-and-swap updates report whether a
/// row matched instead of failing.
#[async_trait]
pub trait MetaTxn: Send + Sync {
    async fn get_file(&self, key: &FileKey) -> Result<Option<FileRecord>, MetaError>;

    async fn get_dir_file(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        name: &str,
    ) -> Result<Option<FileRecord>, MetaError>;

    /// Children of `parent_ino` with `ino >= offset`, ascending by ino.
    async fn list_dir_files(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        offset: i64,
        limit: u64,
    ) -> Result<Vec<DirEntry>, MetaError>;

    /// Last ino handed out in a namespace, `None` before the first allocation.
    async fn read_ino_counter(&self, region: &str, bucket: &str) -> Result<Option<i64>, MetaError>;

    /// Move the counter from `current` to `next`. Returns `false` when
    /// another transaction moved it first.
    async fn swap_ino_counter(
        &self,
        region: &str,
        bucket: &str,
        current: Option<i64>,
        next: i64,
    ) -> Result<bool, MetaError>;

    async fn insert_file(&self, file: &FileRecord) -> Result<(), MetaError>;

    /// Overwrite the mutable attributes of `file` if the stored generation
    /// still equals `expected_generation`.
    async fn update_file(
        &self,
        file: &FileRecord,
        expected_generation: u64,
    ) -> Result<bool, MetaError>;

    async fn get_zone(&self, key: &ZoneKey) -> Result<Option<ZoneRecord>, MetaError>;

    async fn insert_zone(&self, zone: &ZoneRecord) -> Result<(), MetaError>;

    async fn touch_zone(&self, key: &ZoneKey, now: i64) -> Result<(), MetaError>;

    async fn get_file_leader(&self, file: &FileKey)
    -> Result<Option<FileLeaderRecord>, MetaError>;

    async fn insert_file_leader(&self, leader: &FileLeaderRecord) -> Result<(), MetaError>;

    async fn swap_file_leader(
        &self,
        file: &FileKey,
        expected: &str,
        machine: &str,
        now: i64,
    ) -> Result<bool, MetaError>;

    async fn get_segment(
        &self,
        file: &FileKey,
        id: SegmentId,
    ) -> Result<Option<SegmentRecord>, MetaError>;

    async fn insert_segment(&self, segment: &SegmentRecord) -> Result<(), MetaError>;

    async fn update_segment_range(
        &self,
        file: &FileKey,
        id: SegmentId,
        start_offset: u64,
        end_offset: u64,
    ) -> Result<(), MetaError>;

    /// Blocks with `offset <= at < offset + size`, ascending by offset.
    async fn blocks_including(&self, file: &FileKey, at: u64)
    -> Result<Vec<BlockRecord>, MetaError>;

    /// Blocks with `from <= offset` (and `offset < before` when bounded),
    /// ascending by offset.
    async fn blocks_from(
        &self,
        file: &FileKey,
        from: u64,
        before: Option<u64>,
    ) -> Result<Vec<BlockRecord>, MetaError>;

    /// Blocks of one segment starting at any of `positions`.
    async fn blocks_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        positions: &[u64],
    ) -> Result<Vec<BlockRecord>, MetaError>;

    async fn segment_blocks(
        &self,
        file: &FileKey,
        segment: SegmentId,
    ) -> Result<Vec<BlockRecord>, MetaError>;

    /// The block of `segment` whose byte range ends exactly at `end`.
    async fn block_ending_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        end: u64,
    ) -> Result<Option<BlockRecord>, MetaError>;

    async fn file_blocks(&self, file: &FileKey) -> Result<Vec<BlockRecord>, MetaError>;

    async fn apply_block_batch(&self, batch: &BlockBatch) -> Result<(), MetaError>;

    async fn commit(self: Box<Self>) -> Result<(), MetaError>;

    async fn rollback(self: Box<Self>) -> Result<(), MetaError>;
}
