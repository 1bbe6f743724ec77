use sea_orm::entity::prelude::*;

/// File and directory attributes, one row per (region, bucket, ino).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "file")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub parent_ino: i64,
    pub file_name: String,

    #[sea_orm(column_type = "Integer")]
    pub file_type: i32,

    pub size: i64,
    pub generation: i64,
    pub perm: i64,
    pub nlink: i64,
    pub uid: i64,
    pub gid: i64,
    pub blocks: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub atime: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
