//! Request and response payloads of the metadata API.
//!
//! Field names follow the wire format used by the transport layer; empty
//! strings and zero values mean "not supplied".
use serde::{Deserialize, Serialize};

use crate::meta::store::{DirEntry, FileRecord, SegmentId};
use crate::segment::block::{BlockDesc, BlockRecord};
use crate::segment::coverage::WriteOutcome;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitDirRequest {
    pub region: String,
    pub bucket: String,
    pub zone: String,
    pub machine: String,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitDirResponse {
    /// Bootstrap inos created by this call; empty when they already existed.
    pub created: Vec<i64>,
    pub zone_leader: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateFileRequest {
    pub region: String,
    pub bucket: String,
    pub zone: String,
    pub machine: String,
    pub parent_ino: i64,
    pub name: String,
    /// 0 regular (default), 1 regular, 2 directory.
    pub file_type: i32,
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateFileResponse {
    pub file: FileRecord,
    pub leader: String,
    /// False when the name already existed and that file was returned.
    pub created: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAttrRequest {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirFileAttrRequest {
    pub region: String,
    pub bucket: String,
    pub parent_ino: i64,
    pub name: String,
}

/// Attribute update guarded by the generation the caller last saw. Size and
/// block count are derived from blocks and cannot be set here. A time given
/// as 0 means "now".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetFileAttrRequest {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub generation: u64,
    pub perm: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub nlink: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListDirRequest {
    pub region: String,
    pub bucket: String,
    pub parent_ino: i64,
    /// Smallest ino to return; pass the previous page's `next_offset`.
    pub offset: i64,
    /// 0 selects the configured page size.
    pub limit: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListDirResponse {
    pub entries: Vec<DirEntry>,
    pub next_offset: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLeaderRequest {
    pub region: String,
    pub bucket: String,
    pub zone: String,
    pub machine: String,
    pub ino: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileLeaderResponse {
    pub ino: i64,
    pub zone: String,
    pub leader: String,
    pub is_leader: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferLeaderRequest {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentInfoRequest {
    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub offset: u64,
    /// Bytes to cover from `offset`; absent or 0 reads to the end of file.
    pub size: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub offset: u64,
    pub size: u64,
    pub seg_start_addr: u64,
    pub seg_end_addr: u64,
}

impl From<&BlockRecord> for BlockInfo {
    fn from(b: &BlockRecord) -> Self {
        Self {
            offset: b.offset,
            size: b.size,
            seg_start_addr: b.seg_start_addr,
            seg_end_addr: b.seg_end_addr,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment: SegmentId,
    pub leader: String,
    pub blocks: Vec<BlockInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentInfoResponse {
    pub segments: Vec<SegmentInfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSegmentBlocksRequest {
    pub region: String,
    pub bucket: String,
    pub zone: String,
    pub machine: String,
    pub ino: i64,
    pub segment: SegmentId,
    /// Writes into `segment`, resolved in order.
    pub blocks: Vec<BlockInfo>,
}

impl UpdateSegmentBlocksRequest {
    pub fn descs(&self) -> Vec<BlockDesc> {
        self.blocks
            .iter()
            .map(|b| BlockDesc {
                segment: self.segment,
                offset: b.offset,
                size: b.size,
                seg_start_addr: b.seg_start_addr,
                seg_end_addr: b.seg_end_addr,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateSegmentBlocksResponse {
    /// The file after the aggregate update.
    pub file: FileRecord,
    pub outcomes: Vec<WriteOutcome>,
}
