//! Boundary checks and defaults, applied before any store access.
use crate::meta::store::{FileType, MetaError};

pub const ROOT_DIR_INO: i64 = 1;
pub const ROOT_PARENT_DIR_INO: i64 = 2;

pub const FILE_PERM: u32 = 0o644;
pub const DIR_PERM: u32 = 0o755;

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), MetaError> {
    if value.is_empty() {
        return Err(MetaError::MissingRequiredParams(field.to_string()));
    }
    Ok(())
}

pub(crate) fn require_ino(field: &'static str, ino: i64) -> Result<(), MetaError> {
    if ino <= 0 {
        return Err(MetaError::MissingRequiredParams(field.to_string()));
    }
    Ok(())
}

pub(crate) fn region_or(region: &str, default_region: &str) -> String {
    if region.is_empty() {
        default_region.to_string()
    } else {
        region.to_string()
    }
}

/// Type code 0 means a regular file.
pub(crate) fn file_type(code: i32) -> Result<FileType, MetaError> {
    match code {
        0 => Ok(FileType::Regular),
        code => FileType::from_code(code),
    }
}

pub(crate) fn perm_or_default(perm: u32, file_type: FileType) -> u32 {
    match (perm, file_type) {
        (0, FileType::Regular) => FILE_PERM,
        (0, FileType::Directory) => DIR_PERM,
        (perm, _) => perm,
    }
}
