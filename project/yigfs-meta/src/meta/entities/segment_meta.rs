use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "segment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub region: String,
    pub bucket: String,
    pub ino: i64,
    pub seg_id0: i64,
    pub seg_id1: i64,
    pub leader: String,
    pub start_offset: i64,
    pub end_offset: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
