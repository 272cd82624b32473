//! Relational mirror of the assembled lifecourses.
//!
//! Rows are upserted by lifecourse key. Rows whose key is not part of the current run are kept
//! but flagged stale rather than deleted.

use std::path::Path;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{IndexerError, Result};
use crate::types::LifeCourse;

/// Write access the pipeline needs from the relational store.
pub trait RelationalStore {
    /// Insert or replace every lifecourse, stamped with `data_version`. Returns rows written.
    fn upsert_lifecourses(&mut self, lifecourses: &[LifeCourse], data_version: &str) -> Result<usize>;

    /// Flag every row whose key is not in `current_keys` as stale. Returns rows newly flagged.
    fn mark_stale_except(&mut self, current_keys: &[&str]) -> Result<usize>;
}

/// A row as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLifecourse {
    pub key: String,
    pub life_course_id: u64,
    pub link_ids: String,
    pub pa_keys: String,
    pub data_version: String,
    pub stale: bool,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS lifecourses (
    key            TEXT PRIMARY KEY,
    life_course_id INTEGER NOT NULL,
    link_ids       TEXT NOT NULL,
    pa_keys        TEXT NOT NULL,
    data_version   TEXT NOT NULL,
    is_stale       INTEGER NOT NULL DEFAULT 0,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS lifecourses_data_version ON lifecourses (data_version);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn lifecourse(&self, key: &str) -> Result<Option<StoredLifecourse>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, life_course_id, link_ids, pa_keys, data_version, is_stale
                 FROM lifecourses WHERE key = ?1",
                params![key],
                |row| {
                    let id: i64 = row.get(1)?;
                    Ok(StoredLifecourse {
                        key: row.get(0)?,
                        life_course_id: u64::try_from(id).map_err(|err| {
                            rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(err))
                        })?,
                        link_ids: row.get(2)?,
                        pa_keys: row.get(3)?,
                        data_version: row.get(4)?,
                        stale: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count(&self, stale: bool) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM lifecourses WHERE is_stale = ?1",
            params![i64::from(stale)],
            |row| row.get(0),
        )?;
        usize::try_from(n).map_err(|err| {
            IndexerError::Store(rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
        })
    }
}

impl RelationalStore for SqliteStore {
    fn upsert_lifecourses(&mut self, lifecourses: &[LifeCourse], data_version: &str) -> Result<usize> {
        let updated_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO lifecourses
                     (key, life_course_id, link_ids, pa_keys, data_version, is_stale, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                     life_course_id = excluded.life_course_id,
                     link_ids = excluded.link_ids,
                     pa_keys = excluded.pa_keys,
                     data_version = excluded.data_version,
                     is_stale = 0,
                     updated_at = excluded.updated_at",
            )?;
            for lifecourse in lifecourses {
                let pa_keys: Vec<String> = lifecourse.pa_keys().into_iter().collect();
                let id = i64::try_from(lifecourse.life_course_id)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                written += stmt.execute(params![
                    lifecourse.key,
                    id,
                    lifecourse.link_ids,
                    pa_keys.join(","),
                    data_version,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(
            target = "lifecourse::store",
            rows = written,
            data_version,
            "upserted lifecourses"
        );
        Ok(written)
    }

    fn mark_stale_except(&mut self, current_keys: &[&str]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS current_keys (key TEXT PRIMARY KEY);
             DELETE FROM current_keys;",
        )?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO current_keys (key) VALUES (?1)")?;
            for key in current_keys {
                stmt.execute(params![key])?;
            }
        }
        let flagged = tx.execute(
            "UPDATE lifecourses SET is_stale = 1
             WHERE is_stale = 0 AND key NOT IN (SELECT key FROM current_keys)",
            [],
        )?;
        tx.execute_batch("DELETE FROM current_keys;")?;
        tx.commit()?;
        tracing::info!(target = "lifecourse::store", flagged, "marked stale lifecourses");
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LifeCourseRow, Link};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn lifecourse(id: u64, a: u64, b: u64) -> LifeCourse {
        let mut link = Link {
            link_id: id.to_string(),
            source_id1: Some(1),
            pa_id1: Some(a),
            source_id2: Some(2),
            pa_id2: Some(b),
            ..Link::default()
        };
        link.init_key().expect("key");
        LifeCourse::new(
            LifeCourseRow {
                life_course_id: id,
                link_ids: id.to_string(),
            },
            vec![Arc::new(link)],
            "1.0",
        )
    }

    #[test]
    fn upsert_replaces_by_key() {
        let mut store = SqliteStore::open_in_memory().expect("store");
        let first = lifecourse(1, 10, 20);
        store.upsert_lifecourses(&[first.clone()], "1.0").expect("upsert");

        let mut again = first.clone();
        again.life_course_id = 7;
        store.upsert_lifecourses(&[again], "2.0").expect("upsert");

        let row = store.lifecourse(&first.key).expect("read").expect("row");
        assert_eq!(row.life_course_id, 7);
        assert_eq!(row.data_version, "2.0");
        assert_eq!(row.pa_keys, "1-10,2-20");
        assert_eq!(store.count(false).expect("count"), 1);
    }

    #[test]
    fn rows_outside_current_run_become_stale() {
        let mut store = SqliteStore::open_in_memory().expect("store");
        let kept = lifecourse(1, 10, 20);
        let dropped = lifecourse(2, 30, 40);
        store
            .upsert_lifecourses(&[kept.clone(), dropped.clone()], "1.0")
            .expect("upsert");

        let flagged = store.mark_stale_except(&[kept.key.as_str()]).expect("stale");
        assert_eq!(flagged, 1);
        assert!(store.lifecourse(&dropped.key).expect("read").expect("row").stale);
        assert!(!store.lifecourse(&kept.key).expect("read").expect("row").stale);

        // Re-upserting revives the row.
        store.upsert_lifecourses(&[dropped.clone()], "1.1").expect("upsert");
        assert!(!store.lifecourse(&dropped.key).expect("read").expect("row").stale);
    }

    #[test]
    fn file_store_persists_between_opens() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("lifecourses.sqlite");
        let lc = lifecourse(1, 10, 20);
        {
            let mut store = SqliteStore::open(&path).expect("open");
            store.upsert_lifecourses(&[lc.clone()], "1.0").expect("upsert");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert!(store.lifecourse(&lc.key).expect("read").is_some());
    }

    #[test]
    fn out_of_range_ids_are_errors() {
        let mut store = SqliteStore::open_in_memory().expect("store");
        let mut huge = lifecourse(1, 10, 20);
        huge.life_course_id = u64::MAX;
        let err = store.upsert_lifecourses(&[huge], "1.0").expect_err("too wide");
        assert!(matches!(err, IndexerError::Store(_)), "{err:?}");
        assert_eq!(store.count(false).expect("count"), 0);

        let lc = lifecourse(2, 30, 40);
        store.upsert_lifecourses(&[lc.clone()], "1.0").expect("upsert");
        store
            .conn
            .execute(
                "UPDATE lifecourses SET life_course_id = -1 WHERE key = ?1",
                params![lc.key],
            )
            .expect("corrupt row");
        let err = store.lifecourse(&lc.key).expect_err("negative id");
        assert!(matches!(err, IndexerError::Store(_)), "{err:?}");
    }
}
