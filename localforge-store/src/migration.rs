//! On-disk schema versioning
//!
//! Stamps new stores with the current schema version, refuses stores written
//! by a newer build, and repairs strategy markers of unversioned stores.

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::storage::keys;

/// Database version stored in metadata
pub(crate) const DB_VERSION_KEY: &[u8] = b"_db_version";
pub(crate) const CURRENT_VERSION: u32 = 1;

/// Check the schema version of an opened database and bring it up to date
pub fn ensure_schema(db: &DB) -> Result<()> {
    match read_version(db)? {
        Some(version) if version == CURRENT_VERSION => Ok(()),
        Some(version) if version > CURRENT_VERSION => Err(StoreError::schema(format!(
            "store has schema v{} but this build supports up to v{}",
            version, CURRENT_VERSION
        ))),
        Some(version) => Err(StoreError::schema(format!(
            "no migration path from schema v{}",
            version
        ))),
        None => {
            let repaired = rebuild_strategy_markers(db)?;
            if repaired > 0 {
                log::warn!(
                    "Unversioned store: rebuilt strategy markers for {} documents",
                    repaired
                );
            }
            db.put(DB_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
            db.flush()?;
            log::debug!("Stamped store with schema v{}", CURRENT_VERSION);
            Ok(())
        }
    }
}

fn read_version(db: &DB) -> Result<Option<u32>> {
    match db.get(DB_VERSION_KEY)? {
        Some(bytes) => {
            let version_bytes: [u8; 4] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::schema("invalid version format"))?;
            Ok(Some(u32::from_le_bytes(version_bytes)))
        }
        None => Ok(None),
    }
}

/// Recreate one strategy marker per document record
fn rebuild_strategy_markers(db: &DB) -> Result<usize> {
    let mut batch = WriteBatch::default();
    let mut count = 0;

    let iter = db.iterator(IteratorMode::From(keys::DOC_PREFIX, Direction::Forward));
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(keys::DOC_PREFIX) {
            break;
        }
        match rmp_serde::from_slice::<Document>(&value) {
            Ok(doc) => {
                batch.put(keys::strategy_marker(&doc.strategy_id, &doc.doc_id), b"");
                count += 1;
            }
            Err(e) => {
                log::warn!(
                    "Skipping undecodable record {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                );
            }
        }
    }

    if count > 0 {
        db.write(batch)?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rocksdb::Options;
    use tempfile::TempDir;

    fn open(path: &std::path::Path) -> DB {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        DB::open(&opts, path).unwrap()
    }

    #[test]
    fn test_fresh_store_is_stamped() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());

        ensure_schema(&db).unwrap();
        assert_eq!(read_version(&db).unwrap(), Some(CURRENT_VERSION));

        // Idempotent
        ensure_schema(&db).unwrap();
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());
        db.put(DB_VERSION_KEY, (CURRENT_VERSION + 1).to_le_bytes())
            .unwrap();

        assert!(matches!(ensure_schema(&db), Err(StoreError::Schema(_))));
    }

    #[test]
    fn test_unversioned_store_gets_markers() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path());

        let doc = Document {
            doc_id: "notes.md".into(),
            content: "hello".into(),
            metadata: Default::default(),
            embedding: vec![1.0, 0.0],
            strategy_id: "s/v1".into(),
            dimension: 2,
            updated_at: Utc::now(),
            revision: 1,
        };
        db.put(keys::document(&doc.doc_id), rmp_serde::to_vec_named(&doc).unwrap())
            .unwrap();

        ensure_schema(&db).unwrap();

        let marker = db.get(keys::strategy_marker("s/v1", "notes.md")).unwrap();
        assert!(marker.is_some());
    }
}
