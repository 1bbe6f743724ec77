//! Metadata plane of the yigfs distributed filesystem.
//!
//! Tracks files, the machine leading writes to each file, and for every file
//! the minimal set of blocks describing where its current bytes live.

pub mod meta;
pub mod segment;
pub mod service;
pub(crate) mod utils;

pub use crate::meta::config::{Config, DatabaseConfig, DatabaseType, ServiceConfig};
pub use crate::meta::factory::{MetaStoreFactory, create_meta_store, create_meta_store_from_url};
pub use crate::meta::store::{
    DirEntry, ErrorKind, FileKey, FileRecord, FileType, MetaError, MetaStore, MetaTxn, SegmentId,
    ZoneKey,
};
pub use crate::meta::stores::DatabaseMetaStore;
pub use crate::segment::{BlockDesc, BlockRecord, FileAggregate, SegmentPositions, WriteOutcome};
pub use crate::service::MetaService;
