use sea_orm::entity::prelude::*;

/// One write's coverage of `[file_offset, file_offset + size)`, backed by
/// `[seg_start_addr, seg_end_addr)` of the segment object.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "file_block")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub seg_id0: i64,
    pub seg_id1: i64,
    pub file_offset: i64,
    pub size: i64,
    pub seg_start_addr: i64,
    pub seg_end_addr: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
