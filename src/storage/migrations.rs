//! Schema versioning for the sled stores
//!
//! The `meta` tree carries a single `schema_version` key. Each migration
//! step is idempotent and runs exactly once; opening a database from a
//! newer schema than this binary understands is a hard error.

use sled::Db;
use tracing::info;

use super::StoreError;

pub const CURRENT_VERSION: u32 = 1;
const META_TREE: &str = "meta";
const VERSION_KEY: &[u8] = b"schema_version";

/// Bring the database to `CURRENT_VERSION`.
pub fn run(db: &Db) -> Result<(), StoreError> {
    let meta = db.open_tree(META_TREE)?;
    let mut version = meta.get(VERSION_KEY)?.map(decode_version).unwrap_or(0);

    if version > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    while version < CURRENT_VERSION {
        version += 1;
        apply(db, version)?;
        meta.insert(VERSION_KEY, &version.to_be_bytes())?;
        info!(version, "applied schema migration");
    }
    meta.flush()?;
    Ok(())
}

fn apply(db: &Db, version: u32) -> Result<(), StoreError> {
    match version {
        // v1: create the base trees.
        1 => {
            db.open_tree(super::patterns::TREE_PATTERNS)?;
            db.open_tree(super::patterns::TREE_SUGGESTED)?;
            db.open_tree(super::suggestions::TREE_SUGGESTIONS)?;
            Ok(())
        }
        other => Err(StoreError::Migration(format!("unknown migration step {other}"))),
    }
}

/// Current version of an open database.
pub fn version(db: &Db) -> Result<u32, StoreError> {
    let meta = db.open_tree(META_TREE)?;
    Ok(meta.get(VERSION_KEY)?.map(decode_version).unwrap_or(0))
}

/// Big-endian u32; a short or corrupt value reads as version 0.
fn decode_version(raw: sled::IVec) -> u32 {
    let mut bytes = [0u8; 4];
    let len = raw.len().min(4);
    bytes[..len].copy_from_slice(&raw[..len]);
    if raw.len() == 4 {
        u32::from_be_bytes(bytes)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_migrates_to_current() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        run(&db).unwrap();
        assert_eq!(version(&db).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        run(&db).unwrap();
        run(&db).unwrap();
        assert_eq!(version(&db).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let meta = db.open_tree(META_TREE).unwrap();
        meta.insert(VERSION_KEY, &99u32.to_be_bytes()).unwrap();
        assert!(run(&db).is_err());
    }
}
