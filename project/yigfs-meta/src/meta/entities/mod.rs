pub mod block_meta;
pub mod counter_meta;
pub mod file_leader_meta;
pub mod file_meta;
pub mod segment_meta;
pub mod zone_meta;

pub use block_meta::{Entity as BlockMeta, Model as BlockMetaModel};
pub use counter_meta::{Entity as CounterMeta, Model as CounterMetaModel};
pub use file_leader_meta::{Entity as FileLeaderMeta, Model as FileLeaderMetaModel};
pub use file_meta::{Entity as FileMeta, Model as FileMetaModel};
pub use segment_meta::{Entity as SegmentMeta, Model as SegmentMetaModel};
pub use zone_meta::{Entity as ZoneMeta, Model as ZoneMetaModel};
