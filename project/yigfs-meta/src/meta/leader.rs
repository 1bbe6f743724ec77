//! Zone and file write leadership.
//!
//! Every block mutation of a file is routed through one machine, the file
//! leader. Leaders are plain records: the first writer establishes them and
//! later writers read and defer. Losing an insert race surfaces as
//! [`MetaError::ContinueRetry`] so the caller restarts its transaction and
//! adopts the winner's record.
use tracing::{debug, info};

use crate::meta::store::{FileKey, FileLeaderRecord, MetaError, MetaTxn, ZoneKey, ZoneRecord};

fn lost_race(e: MetaError) -> MetaError {
    match e {
        MetaError::AlreadyExists(_) => MetaError::ContinueRetry,
        e => e,
    }
}

/// The zone's up machine, registering `machine` when the zone has none.
pub async fn get_or_assign_zone_leader(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    machine: &str,
    now: i64,
) -> Result<String, MetaError> {
    if let Some(existing) = txn.get_zone(zone).await? {
        txn.touch_zone(zone, now).await?;
        return Ok(existing.machine);
    }

    let record = ZoneRecord {
        key: zone.clone(),
        machine: machine.to_string(),
        updated_at: now,
    };
    txn.insert_zone(&record).await.map_err(lost_race)?;
    info!(zone = %zone.zone_id, region = %zone.region, bucket = %zone.bucket, machine, "zone registered");
    Ok(record.machine)
}

/// Record `machine` as leader of a file that has none yet.
pub async fn assign_file_leader(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    file: &FileKey,
    machine: &str,
    now: i64,
) -> Result<String, MetaError> {
    let record = FileLeaderRecord {
        file: file.clone(),
        zone_id: zone.zone_id.clone(),
        machine: machine.to_string(),
        updated_at: now,
    };
    txn.insert_file_leader(&record).await.map_err(lost_race)?;
    debug!(file = %file, machine, "file leader assigned");
    Ok(record.machine)
}

/// The file's leader. A file without one is handed to the zone's up
/// machine, registering `requester` for the zone if needed.
pub async fn get_or_create_file_leader(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    file: &FileKey,
    requester: &str,
    now: i64,
) -> Result<String, MetaError> {
    if let Some(leader) = txn.get_file_leader(file).await? {
        return Ok(leader.machine);
    }
    let machine = get_or_assign_zone_leader(txn, zone, requester, now).await?;
    assign_file_leader(txn, zone, file, &machine, now).await
}

/// Fails with [`MetaError::NotLeader`] unless `machine` leads `file`.
pub async fn ensure_file_leader(
    txn: &dyn MetaTxn,
    zone: &ZoneKey,
    file: &FileKey,
    machine: &str,
    now: i64,
) -> Result<(), MetaError> {
    let leader = get_or_create_file_leader(txn, zone, file, machine, now).await?;
    if leader != machine {
        return Err(MetaError::NotLeader {
            ino: file.ino,
            leader,
        });
    }
    Ok(())
}

/// Move leadership of `file` from `from` to `to`. Fails with `Conflict` if
/// the leader is no longer `from`.
pub async fn transfer_file_leader(
    txn: &dyn MetaTxn,
    file: &FileKey,
    from: &str,
    to: &str,
    now: i64,
) -> Result<(), MetaError> {
    if txn.swap_file_leader(file, from, to, now).await? {
        info!(file = %file, from, to, "file leader transferred");
        return Ok(());
    }
    match txn.get_file_leader(file).await? {
        None => Err(MetaError::NotFound(format!("leader of file {file}"))),
        Some(current) => Err(MetaError::Conflict(format!(
            "file {file} is led by {}, not {from}",
            current.machine
        ))),
    }
}
