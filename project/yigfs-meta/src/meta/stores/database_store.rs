//! Database-based metadata store implementation
//!
//! Supports SQLite and PostgreSQL backends via SeaORM

use crate::meta::config::{Config, DatabaseType};
use crate::meta::entities::*;
use crate::meta::store::{
    DirEntry, FileKey, FileLeaderRecord, FileRecord, FileType, MetaError, MetaStore, MetaTxn,
    SegmentId, SegmentRecord, ZoneKey, ZoneRecord,
};
use crate::segment::block::{BlockBatch, BlockRecord};
use async_trait::async_trait;
use sea_orm::sea_query::Index;
use sea_orm::*;
use tracing::{error, info};

/// Database-based metadata store
pub struct DatabaseMetaStore {
    db: DatabaseConnection,
    _config: Config,
}

impl DatabaseMetaStore {
    /// Create from existing config
    pub async fn from_config(_config: Config) -> Result<Self, MetaError> {
        info!(
            db_type = _config.database.db_type_str(),
            "Initializing DatabaseMetaStore"
        );

        let db = Self::create_connection(&_config).await?;
        Self::init_schema(&db).await?;

        info!("DatabaseMetaStore initialized successfully");
        Ok(Self { db, _config })
    }

    /// Create database connection
    async fn create_connection(config: &Config) -> Result<DatabaseConnection, MetaError> {
        let url = match &config.database.db_config {
            DatabaseType::Sqlite { url } => {
                info!("Connecting to SQLite: {}", url);
                url
            }
            DatabaseType::Postgres { url } => {
                info!("Connecting to PostgreSQL: {}", url);
                url
            }
        };

        let mut opts = ConnectOptions::new(url.clone());
        // Every pooled connection to an in-memory SQLite URL is a separate database.
        if url.contains(":memory:") {
            opts.max_connections(1).min_connections(1);
        }
        opts.sqlx_logging(false);

        Database::connect(opts).await.map_err(db_err("connect"))
    }

    /// Initialize database schema
    async fn init_schema(db: &DatabaseConnection) -> Result<(), MetaError> {
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);

        let tables = [
            schema
                .create_table_from_entity(FileMeta)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(ZoneMeta)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(FileLeaderMeta)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(SegmentMeta)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(BlockMeta)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(CounterMeta)
                .if_not_exists()
                .to_owned(),
        ];

        for stmt in &tables {
            db.execute(builder.build(stmt))
                .await
                .map_err(db_err("create table"))?;
        }

        let indexes = [
            Index::create()
                .if_not_exists()
                .unique()
                .name("uk_file_ino")
                .table(FileMeta)
                .col(file_meta::Column::Region)
                .col(file_meta::Column::Bucket)
                .col(file_meta::Column::Ino)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .unique()
                .name("uk_file_parent_name")
                .table(FileMeta)
                .col(file_meta::Column::Region)
                .col(file_meta::Column::Bucket)
                .col(file_meta::Column::ParentIno)
                .col(file_meta::Column::FileName)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .unique()
                .name("uk_segment_id")
                .table(SegmentMeta)
                .col(segment_meta::Column::Region)
                .col(segment_meta::Column::Bucket)
                .col(segment_meta::Column::Ino)
                .col(segment_meta::Column::SegId0)
                .col(segment_meta::Column::SegId1)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .name("idx_file_block_offset")
                .table(BlockMeta)
                .col(block_meta::Column::Region)
                .col(block_meta::Column::Bucket)
                .col(block_meta::Column::Ino)
                .col(block_meta::Column::FileOffset)
                .to_owned(),
        ];

        for stmt in &indexes {
            db.execute(builder.build(stmt))
                .await
                .map_err(db_err("create index"))?;
        }

        info!("Database schema initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl MetaStore for DatabaseMetaStore {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn begin(&self) -> Result<Box<dyn MetaTxn>, MetaError> {
        let txn = self.db.begin().await.map_err(db_err("begin"))?;
        Ok(Box::new(DatabaseTxn { txn }))
    }
}

/// Unique-key violations become `AlreadyExists`; anything else is logged
/// here and surfaced without backend detail.
fn db_err(op: &'static str) -> impl Fn(DbErr) -> MetaError {
    move |e| {
        if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
            return MetaError::AlreadyExists(op.to_string());
        }
        error!(operation = op, error = %e, "metadata backend failure");
        MetaError::Internal(op.to_string())
    }
}

fn counter_name(region: &str, bucket: &str) -> String {
    format!("ino:{region}:{bucket}")
}

fn file_cond(key: &FileKey) -> Condition {
    Condition::all()
        .add(file_meta::Column::Region.eq(key.region.as_str()))
        .add(file_meta::Column::Bucket.eq(key.bucket.as_str()))
        .add(file_meta::Column::Ino.eq(key.ino))
}

fn leader_cond(key: &FileKey) -> Condition {
    Condition::all()
        .add(file_leader_meta::Column::Region.eq(key.region.as_str()))
        .add(file_leader_meta::Column::Bucket.eq(key.bucket.as_str()))
        .add(file_leader_meta::Column::Ino.eq(key.ino))
}

fn zone_cond(key: &ZoneKey) -> Condition {
    Condition::all()
        .add(zone_meta::Column::ZoneId.eq(key.zone_id.as_str()))
        .add(zone_meta::Column::Region.eq(key.region.as_str()))
        .add(zone_meta::Column::Bucket.eq(key.bucket.as_str()))
}

fn segment_cond(key: &FileKey, id: SegmentId) -> Condition {
    let (id0, id1) = id.to_columns();
    Condition::all()
        .add(segment_meta::Column::Region.eq(key.region.as_str()))
        .add(segment_meta::Column::Bucket.eq(key.bucket.as_str()))
        .add(segment_meta::Column::Ino.eq(key.ino))
        .add(segment_meta::Column::SegId0.eq(id0))
        .add(segment_meta::Column::SegId1.eq(id1))
}

fn block_cond(key: &FileKey) -> Condition {
    Condition::all()
        .add(block_meta::Column::Region.eq(key.region.as_str()))
        .add(block_meta::Column::Bucket.eq(key.bucket.as_str()))
        .add(block_meta::Column::Ino.eq(key.ino))
}

fn block_segment_cond(key: &FileKey, segment: SegmentId) -> Condition {
    let (id0, id1) = segment.to_columns();
    block_cond(key)
        .add(block_meta::Column::SegId0.eq(id0))
        .add(block_meta::Column::SegId1.eq(id1))
}

fn file_from_model(m: file_meta::Model) -> Result<FileRecord, MetaError> {
    let file_type = FileType::from_code(m.file_type).map_err(|_| {
        error!(ino = m.ino, file_type = m.file_type, "undecodable file type");
        MetaError::Internal("decode file".to_string())
    })?;
    Ok(FileRecord {
        region: m.region,
        bucket: m.bucket,
        ino: m.ino,
        parent_ino: m.parent_ino,
        name: m.file_name,
        file_type,
        size: m.size as u64,
        generation: m.generation as u64,
        perm: m.perm as u32,
        nlink: m.nlink as u32,
        uid: m.uid as u32,
        gid: m.gid as u32,
        blocks: m.blocks as u64,
        ctime: m.ctime,
        mtime: m.mtime,
        atime: m.atime,
    })
}

fn block_from_model(m: block_meta::Model) -> BlockRecord {
    BlockRecord {
        id: m.id,
        file: FileKey::new(m.region, m.bucket, m.ino),
        segment: SegmentId::from_columns(m.seg_id0, m.seg_id1),
        offset: m.file_offset as u64,
        size: m.size as u64,
        seg_start_addr: m.seg_start_addr as u64,
        seg_end_addr: m.seg_end_addr as u64,
        updated_at: m.updated_at,
    }
}

/// File offsets are stored as `i64`; anything beyond saturates so range
/// filters stay ordered.
fn offset_col(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

fn block_location(b: &BlockRecord) -> block_meta::ActiveModel {
    let (id0, id1) = b.segment.to_columns();
    block_meta::ActiveModel {
        seg_id0: Set(id0),
        seg_id1: Set(id1),
        file_offset: Set(b.offset as i64),
        size: Set(b.size as i64),
        seg_start_addr: Set(b.seg_start_addr as i64),
        seg_end_addr: Set(b.seg_end_addr as i64),
        updated_at: Set(b.updated_at),
        ..Default::default()
    }
}

/// One SeaORM transaction. Dropping it without `commit` rolls back.
pub struct DatabaseTxn {
    txn: DatabaseTransaction,
}

#[async_trait]
impl MetaTxn for DatabaseTxn {
    async fn get_file(&self, key: &FileKey) -> Result<Option<FileRecord>, MetaError> {
        FileMeta::find()
            .filter(file_cond(key))
            .one(&self.txn)
            .await
            .map_err(db_err("get file"))?
            .map(file_from_model)
            .transpose()
    }

    async fn get_dir_file(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        name: &str,
    ) -> Result<Option<FileRecord>, MetaError> {
        FileMeta::find()
            .filter(file_meta::Column::Region.eq(region))
            .filter(file_meta::Column::Bucket.eq(bucket))
            .filter(file_meta::Column::ParentIno.eq(parent_ino))
            .filter(file_meta::Column::FileName.eq(name))
            .one(&self.txn)
            .await
            .map_err(db_err("get dir file"))?
            .map(file_from_model)
            .transpose()
    }

    async fn list_dir_files(
        &self,
        region: &str,
        bucket: &str,
        parent_ino: i64,
        offset: i64,
        limit: u64,
    ) -> Result<Vec<DirEntry>, MetaError> {
        let rows = FileMeta::find()
            .filter(file_meta::Column::Region.eq(region))
            .filter(file_meta::Column::Bucket.eq(bucket))
            .filter(file_meta::Column::ParentIno.eq(parent_ino))
            .filter(file_meta::Column::Ino.gte(offset))
            .order_by_asc(file_meta::Column::Ino)
            .limit(limit)
            .all(&self.txn)
            .await
            .map_err(db_err("list dir files"))?;

        rows.into_iter()
            .map(|m| {
                file_from_model(m).map(|f| DirEntry {
                    ino: f.ino,
                    name: f.name,
                    file_type: f.file_type,
                })
            })
            .collect()
    }

    async fn read_ino_counter(&self, region: &str, bucket: &str) -> Result<Option<i64>, MetaError> {
        Ok(CounterMeta::find_by_id(counter_name(region, bucket))
            .one(&self.txn)
            .await
            .map_err(db_err("read ino counter"))?
            .map(|c| c.value))
    }

    async fn swap_ino_counter(
        &self,
        region: &str,
        bucket: &str,
        current: Option<i64>,
        next: i64,
    ) -> Result<bool, MetaError> {
        let name = counter_name(region, bucket);
        match current {
            None => {
                let counter = counter_meta::ActiveModel {
                    name: Set(name),
                    value: Set(next),
                };
                match CounterMeta::insert(counter)
                    .exec_without_returning(&self.txn)
                    .await
                    .map_err(db_err("init ino counter"))
                {
                    Ok(_) => Ok(true),
                    Err(MetaError::AlreadyExists(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Some(current) => {
                let res = CounterMeta::update_many()
                    .set(counter_meta::ActiveModel {
                        value: Set(next),
                        ..Default::default()
                    })
                    .filter(counter_meta::Column::Name.eq(name))
                    .filter(counter_meta::Column::Value.eq(current))
                    .exec(&self.txn)
                    .await
                    .map_err(db_err("advance ino counter"))?;
                Ok(res.rows_affected == 1)
            }
        }
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<(), MetaError> {
        let model = file_meta::ActiveModel {
            region: Set(file.region.clone()),
            bucket: Set(file.bucket.clone()),
            ino: Set(file.ino),
            parent_ino: Set(file.parent_ino),
            file_name: Set(file.name.clone()),
            file_type: Set(file.file_type.code()),
            size: Set(file.size as i64),
            generation: Set(file.generation as i64),
            perm: Set(file.perm as i64),
            nlink: Set(file.nlink as i64),
            uid: Set(file.uid as i64),
            gid: Set(file.gid as i64),
            blocks: Set(file.blocks as i64),
            ctime: Set(file.ctime),
            mtime: Set(file.mtime),
            atime: Set(file.atime),
            ..Default::default()
        };
        FileMeta::insert(model)
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err("insert file"))?;
        Ok(())
    }

    async fn update_file(
        &self,
        file: &FileRecord,
        expected_generation: u64,
    ) -> Result<bool, MetaError> {
        let changes = file_meta::ActiveModel {
            size: Set(file.size as i64),
            generation: Set(file.generation as i64),
            perm: Set(file.perm as i64),
            nlink: Set(file.nlink as i64),
            uid: Set(file.uid as i64),
            gid: Set(file.gid as i64),
            blocks: Set(file.blocks as i64),
            ctime: Set(file.ctime),
            mtime: Set(file.mtime),
            atime: Set(file.atime),
            ..Default::default()
        };
        let res = FileMeta::update_many()
            .set(changes)
            .filter(file_cond(&file.key()))
            .filter(file_meta::Column::Generation.eq(expected_generation as i64))
            .exec(&self.txn)
            .await
            .map_err(db_err("update file"))?;
        Ok(res.rows_affected == 1)
    }

    async fn get_zone(&self, key: &ZoneKey) -> Result<Option<ZoneRecord>, MetaError> {
        Ok(ZoneMeta::find()
            .filter(zone_cond(key))
            .one(&self.txn)
            .await
            .map_err(db_err("get zone"))?
            .map(|m| ZoneRecord {
                key: ZoneKey::new(m.zone_id, m.region, m.bucket),
                machine: m.machine,
                updated_at: m.updated_at,
            }))
    }

    async fn insert_zone(&self, zone: &ZoneRecord) -> Result<(), MetaError> {
        let model = zone_meta::ActiveModel {
            zone_id: Set(zone.key.zone_id.clone()),
            region: Set(zone.key.region.clone()),
            bucket: Set(zone.key.bucket.clone()),
            machine: Set(zone.machine.clone()),
            updated_at: Set(zone.updated_at),
        };
        ZoneMeta::insert(model)
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err("insert zone"))?;
        Ok(())
    }

    async fn touch_zone(&self, key: &ZoneKey, now: i64) -> Result<(), MetaError> {
        ZoneMeta::update_many()
            .set(zone_meta::ActiveModel {
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(zone_cond(key))
            .exec(&self.txn)
            .await
            .map_err(db_err("touch zone"))?;
        Ok(())
    }

    async fn get_file_leader(
        &self,
        file: &FileKey,
    ) -> Result<Option<FileLeaderRecord>, MetaError> {
        Ok(FileLeaderMeta::find()
            .filter(leader_cond(file))
            .one(&self.txn)
            .await
            .map_err(db_err("get file leader"))?
            .map(|m| FileLeaderRecord {
                file: FileKey::new(m.region, m.bucket, m.ino),
                zone_id: m.zone_id,
                machine: m.machine,
                updated_at: m.updated_at,
            }))
    }

    async fn insert_file_leader(&self, leader: &FileLeaderRecord) -> Result<(), MetaError> {
        let model = file_leader_meta::ActiveModel {
            region: Set(leader.file.region.clone()),
            bucket: Set(leader.file.bucket.clone()),
            ino: Set(leader.file.ino),
            zone_id: Set(leader.zone_id.clone()),
            machine: Set(leader.machine.clone()),
            updated_at: Set(leader.updated_at),
        };
        FileLeaderMeta::insert(model)
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err("insert file leader"))?;
        Ok(())
    }

    async fn swap_file_leader(
        &self,
        file: &FileKey,
        expected: &str,
        machine: &str,
        now: i64,
    ) -> Result<bool, MetaError> {
        let res = FileLeaderMeta::update_many()
            .set(file_leader_meta::ActiveModel {
                machine: Set(machine.to_string()),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(leader_cond(file))
            .filter(file_leader_meta::Column::Machine.eq(expected))
            .exec(&self.txn)
            .await
            .map_err(db_err("swap file leader"))?;
        Ok(res.rows_affected == 1)
    }

    async fn get_segment(
        &self,
        file: &FileKey,
        id: SegmentId,
    ) -> Result<Option<SegmentRecord>, MetaError> {
        Ok(SegmentMeta::find()
            .filter(segment_cond(file, id))
            .one(&self.txn)
            .await
            .map_err(db_err("get segment"))?
            .map(|m| SegmentRecord {
                file: FileKey::new(m.region, m.bucket, m.ino),
                id: SegmentId::from_columns(m.seg_id0, m.seg_id1),
                leader: m.leader,
                start_offset: m.start_offset as u64,
                end_offset: m.end_offset as u64,
            }))
    }

    async fn insert_segment(&self, segment: &SegmentRecord) -> Result<(), MetaError> {
        let (id0, id1) = segment.id.to_columns();
        let model = segment_meta::ActiveModel {
            region: Set(segment.file.region.clone()),
            bucket: Set(segment.file.bucket.clone()),
            ino: Set(segment.file.ino),
            seg_id0: Set(id0),
            seg_id1: Set(id1),
            leader: Set(segment.leader.clone()),
            start_offset: Set(segment.start_offset as i64),
            end_offset: Set(segment.end_offset as i64),
            ..Default::default()
        };
        SegmentMeta::insert(model)
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err("insert segment"))?;
        Ok(())
    }

    async fn update_segment_range(
        &self,
        file: &FileKey,
        id: SegmentId,
        start_offset: u64,
        end_offset: u64,
    ) -> Result<(), MetaError> {
        SegmentMeta::update_many()
            .set(segment_meta::ActiveModel {
                start_offset: Set(start_offset as i64),
                end_offset: Set(end_offset as i64),
                ..Default::default()
            })
            .filter(segment_cond(file, id))
            .exec(&self.txn)
            .await
            .map_err(db_err("update segment range"))?;
        Ok(())
    }

    async fn blocks_including(
        &self,
        file: &FileKey,
        at: u64,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        // Blocks are disjoint, so only the last block starting at or before
        // `at` can contain it.
        let row = BlockMeta::find()
            .filter(block_cond(file))
            .filter(block_meta::Column::FileOffset.lte(offset_col(at)))
            .order_by_desc(block_meta::Column::FileOffset)
            .one(&self.txn)
            .await
            .map_err(db_err("blocks including offset"))?;
        Ok(row
            .map(block_from_model)
            .filter(|b| b.end() > at)
            .into_iter()
            .collect())
    }

    async fn blocks_from(
        &self,
        file: &FileKey,
        from: u64,
        before: Option<u64>,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        let mut query = BlockMeta::find()
            .filter(block_cond(file))
            .filter(block_meta::Column::FileOffset.gte(offset_col(from)));
        if let Some(before) = before {
            query = query.filter(block_meta::Column::FileOffset.lt(offset_col(before)));
        }
        let rows = query
            .order_by_asc(block_meta::Column::FileOffset)
            .all(&self.txn)
            .await
            .map_err(db_err("blocks from offset"))?;
        Ok(rows.into_iter().map(block_from_model).collect())
    }

    async fn blocks_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        positions: &[u64],
    ) -> Result<Vec<BlockRecord>, MetaError> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let rows = BlockMeta::find()
            .filter(block_segment_cond(file, segment))
            .filter(
                block_meta::Column::FileOffset.is_in(positions.iter().map(|p| offset_col(*p))),
            )
            .order_by_asc(block_meta::Column::FileOffset)
            .all(&self.txn)
            .await
            .map_err(db_err("blocks at positions"))?;
        Ok(rows.into_iter().map(block_from_model).collect())
    }

    async fn segment_blocks(
        &self,
        file: &FileKey,
        segment: SegmentId,
    ) -> Result<Vec<BlockRecord>, MetaError> {
        let rows = BlockMeta::find()
            .filter(block_segment_cond(file, segment))
            .order_by_asc(block_meta::Column::FileOffset)
            .all(&self.txn)
            .await
            .map_err(db_err("segment blocks"))?;
        Ok(rows.into_iter().map(block_from_model).collect())
    }

    async fn block_ending_at(
        &self,
        file: &FileKey,
        segment: SegmentId,
        end: u64,
    ) -> Result<Option<BlockRecord>, MetaError> {
        // Same reasoning as `blocks_including`: the nearest block below `end`
        // is the only one that can end there.
        let row = BlockMeta::find()
            .filter(block_segment_cond(file, segment))
            .filter(block_meta::Column::FileOffset.lt(offset_col(end)))
            .order_by_desc(block_meta::Column::FileOffset)
            .one(&self.txn)
            .await
            .map_err(db_err("block ending at"))?;
        Ok(row.map(block_from_model).filter(|b| b.end() == end))
    }

    async fn file_blocks(&self, file: &FileKey) -> Result<Vec<BlockRecord>, MetaError> {
        let rows = BlockMeta::find()
            .filter(block_cond(file))
            .order_by_asc(block_meta::Column::FileOffset)
            .all(&self.txn)
            .await
            .map_err(db_err("file blocks"))?;
        Ok(rows.into_iter().map(block_from_model).collect())
    }

    async fn apply_block_batch(&self, batch: &BlockBatch) -> Result<(), MetaError> {
        if !batch.deletes.is_empty() {
            BlockMeta::delete_many()
                .filter(block_meta::Column::Id.is_in(batch.deletes.iter().map(|b| b.id)))
                .exec(&self.txn)
                .await
                .map_err(db_err("delete blocks"))?;
        }

        for block in &batch.updates {
            let res = BlockMeta::update_many()
                .set(block_location(block))
                .filter(block_meta::Column::Id.eq(block.id))
                .exec(&self.txn)
                .await
                .map_err(db_err("update block"))?;
            if res.rows_affected != 1 {
                return Err(MetaError::ContinueRetry);
            }
        }

        for block in &batch.inserts {
            let mut model = block_location(block);
            model.region = Set(block.file.region.clone());
            model.bucket = Set(block.file.bucket.clone());
            model.ino = Set(block.file.ino);
            BlockMeta::insert(model)
                .exec_without_returning(&self.txn)
                .await
                .map_err(db_err("insert block"))?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), MetaError> {
        self.txn.commit().await.map_err(db_err("commit"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), MetaError> {
        self.txn.rollback().await.map_err(db_err("rollback"))
    }
}
