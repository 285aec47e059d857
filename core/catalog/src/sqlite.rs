//! SQLite-backed catalog.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{ArchiveRecord, KeyPairRecord, NewArchive, NewKeyPair, PasswordMeta};
use crate::store::CatalogStore;
use keycrypt_common::{Error, Result};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS passwords (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hint TEXT NOT NULL,
        strong INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS key_pairs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        public_key BLOB NOT NULL,
        private_key BLOB NOT NULL,
        password_id INTEGER REFERENCES passwords(id),
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS archives (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        src_path TEXT NOT NULL,
        dst_path TEXT NOT NULL,
        created_at TEXT NOT NULL,
        key_pair_id INTEGER NOT NULL REFERENCES key_pairs(id)
    );

    CREATE INDEX IF NOT EXISTS idx_archives_name ON archives(name);
"#;

const KEY_PAIR_SELECT: &str = r#"
    SELECT k.id, k.name, k.public_key, k.private_key, k.created_at, p.hint, p.strong
    FROM key_pairs k LEFT JOIN passwords p ON p.id = k.password_id
"#;

const ARCHIVE_SELECT: &str = r#"
    SELECT a.id, a.name, a.src_path, a.dst_path, a.created_at, a.key_pair_id, k.name
    FROM archives a JOIN key_pairs k ON k.id = a.key_pair_id
"#;

fn catalog_error(err: rusqlite::Error) -> Error {
    Error::Catalog(err.to_string())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn to_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn key_pair_from_row(row: &Row<'_>) -> rusqlite::Result<KeyPairRecord> {
    let hint: Option<String> = row.get(5)?;
    let strong: Option<bool> = row.get(6)?;
    let password = match (hint, strong) {
        (Some(hint), Some(strong)) => Some(PasswordMeta { hint, strong }),
        _ => None,
    };

    Ok(KeyPairRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        public_key: row.get(2)?,
        private_key: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        password,
    })
}

fn archive_from_row(row: &Row<'_>) -> rusqlite::Result<ArchiveRecord> {
    Ok(ArchiveRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        src_path: row.get(2)?,
        dst_path: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        key_pair_id: row.get(5)?,
        key_pair_name: row.get(6)?,
    })
}

/// Catalog stored in a single SQLite database file.
pub struct SqliteCatalog {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteCatalog {
    /// Create or open a catalog database.
    ///
    /// The file and schema are created if missing.
    ///
    /// # Errors
    /// - `Catalog` on database creation or schema failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(catalog_error)?;
        conn.execute_batch(SCHEMA).map_err(catalog_error)?;

        info!(path = %path.display(), "Catalog opened");
        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Create an in-memory catalog (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(catalog_error)?;
        conn.execute_batch(SCHEMA).map_err(catalog_error)?;
        Ok(Self { conn, path: None })
    }

    fn archive_by_id(&self, id: i64) -> Result<ArchiveRecord> {
        self.conn
            .query_row(
                &format!("{} WHERE a.id = ?1", ARCHIVE_SELECT),
                [id],
                archive_from_row,
            )
            .map_err(catalog_error)
    }
}

impl CatalogStore for SqliteCatalog {
    fn create_key_pair(&self, key_pair: NewKeyPair) -> Result<KeyPairRecord> {
        debug!(name = %key_pair.name, "Creating key pair");
        let created_at = Utc::now();
        let tx = self.conn.unchecked_transaction().map_err(catalog_error)?;

        let password_id = match &key_pair.password {
            Some(meta) => {
                tx.execute(
                    "INSERT INTO passwords (hint, strong) VALUES (?1, ?2)",
                    params![meta.hint, meta.strong],
                )
                .map_err(catalog_error)?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        let inserted = tx.execute(
            r#"
            INSERT INTO key_pairs (name, public_key, private_key, password_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                key_pair.name,
                key_pair.public_key,
                key_pair.private_key,
                password_id,
                to_timestamp(&created_at),
            ],
        );
        if let Err(e) = inserted {
            // Dropping the transaction rolls back the password row as well.
            return Err(if is_constraint_violation(&e) {
                Error::Conflict(format!(
                    "Key pair with name \"{}\" already exists",
                    key_pair.name
                ))
            } else {
                catalog_error(e)
            });
        }
        let id = tx.last_insert_rowid();
        tx.commit().map_err(catalog_error)?;

        Ok(KeyPairRecord {
            id,
            name: key_pair.name,
            public_key: key_pair.public_key,
            private_key: key_pair.private_key,
            password: key_pair.password,
            created_at,
        })
    }

    fn key_pair(&self, name: &str) -> Result<Option<KeyPairRecord>> {
        let found = self.conn.query_row(
            &format!("{} WHERE k.name = ?1", KEY_PAIR_SELECT),
            [name],
            key_pair_from_row,
        );

        match found {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(catalog_error(e)),
        }
    }

    fn key_pairs(&self) -> Result<Vec<KeyPairRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} ORDER BY k.created_at DESC, k.id DESC",
                KEY_PAIR_SELECT
            ))
            .map_err(catalog_error)?;
        let rows = stmt.query_map([], key_pair_from_row).map_err(catalog_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(catalog_error)
    }

    fn record_archive(&self, archive: NewArchive) -> Result<ArchiveRecord> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO archives (name, src_path, dst_path, created_at, key_pair_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                archive.name,
                archive.src_path,
                archive.dst_path,
                to_timestamp(&Utc::now()),
                archive.key_pair_id,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(Error::NotFound(format!(
                    "Key pair {} referenced by archive \"{}\" does not exist",
                    archive.key_pair_id, archive.name
                )))
            }
            Err(e) => return Err(catalog_error(e)),
        }

        debug!(name = %archive.name, "Archive recorded");
        self.archive_by_id(self.conn.last_insert_rowid())
    }

    fn archive(&self, name: &str) -> Result<Option<ArchiveRecord>> {
        let found = self.conn.query_row(
            &format!(
                "{} WHERE a.name = ?1 ORDER BY a.created_at DESC, a.id DESC LIMIT 1",
                ARCHIVE_SELECT
            ),
            [name],
            archive_from_row,
        );

        match found {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(catalog_error(e)),
        }
    }

    fn archives(&self) -> Result<Vec<ArchiveRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} ORDER BY a.created_at DESC, a.id DESC",
                ARCHIVE_SELECT
            ))
            .map_err(catalog_error)?;
        let rows = stmt.query_map([], archive_from_row).map_err(catalog_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(catalog_error)
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycrypt_common::ErrorKind;
    use tempfile::tempdir;

    fn new_pair(name: &str, password: Option<PasswordMeta>) -> NewKeyPair {
        NewKeyPair {
            name: name.to_string(),
            public_key: format!("{}-public", name).into_bytes(),
            private_key: format!("{}-private", name).into_bytes(),
            password,
        }
    }

    fn password_rows(catalog: &SqliteCatalog) -> i64 {
        catalog
            .conn
            .query_row("SELECT COUNT(*) FROM passwords", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_create_and_get_key_pair() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let meta = PasswordMeta {
            hint: "the usual".to_string(),
            strong: false,
        };

        let created = catalog
            .create_key_pair(new_pair("alpha", Some(meta.clone())))
            .unwrap();
        let fetched = catalog.key_pair("alpha").unwrap().unwrap();

        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.private_key, b"alpha-private");
        assert_eq!(fetched.password, Some(meta));
        assert!(fetched.is_protected());
        assert!(catalog.key_pair("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_is_conflict_without_orphans() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let meta = PasswordMeta {
            hint: String::new(),
            strong: true,
        };
        catalog
            .create_key_pair(new_pair("dup", Some(meta.clone())))
            .unwrap();
        assert_eq!(password_rows(&catalog), 1);

        let mut second = new_pair("dup", Some(meta));
        second.private_key = b"other".to_vec();
        let err = catalog.create_key_pair(second).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(password_rows(&catalog), 1);
        assert_eq!(
            catalog.key_pair("dup").unwrap().unwrap().private_key,
            b"dup-private"
        );
    }

    #[test]
    fn test_key_pairs_newest_first() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        catalog.create_key_pair(new_pair("first", None)).unwrap();
        catalog.create_key_pair(new_pair("second", None)).unwrap();
        catalog.create_key_pair(new_pair("third", None)).unwrap();

        let names: Vec<String> = catalog
            .key_pairs()
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(names, vec!["third", "second", "first"]);
    }

    #[test]
    fn test_record_and_fetch_archives() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let pair = catalog.create_key_pair(new_pair("owner", None)).unwrap();

        for dst in ["/backups/one", "/backups/two"] {
            catalog
                .record_archive(NewArchive {
                    name: "report.txt".to_string(),
                    src_path: "/docs/report.txt".to_string(),
                    dst_path: dst.to_string(),
                    key_pair_id: pair.id,
                })
                .unwrap();
        }

        let latest = catalog.archive("report.txt").unwrap().unwrap();
        assert_eq!(latest.dst_path, "/backups/two");
        assert_eq!(latest.key_pair_name, "owner");
        assert_eq!(catalog.archives().unwrap().len(), 2);
        assert!(catalog.archive("absent").unwrap().is_none());
    }

    #[test]
    fn test_archive_requires_existing_key_pair() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let err = catalog
            .record_archive(NewArchive {
                name: "orphan".to_string(),
                src_path: "/a".to_string(),
                dst_path: "/b".to_string(),
                key_pair_id: 42,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_file_catalog_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            assert_eq!(catalog.path(), Some(path.as_path()));
            catalog.create_key_pair(new_pair("kept", None)).unwrap();
        }

        let reopened = SqliteCatalog::open(&path).unwrap();
        assert!(reopened.key_pair("kept").unwrap().is_some());
        assert!(SqliteCatalog::in_memory().unwrap().path().is_none());
    }

    #[test]
    fn test_record_serialization_hides_key_material() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let pair = catalog.create_key_pair(new_pair("quiet", None)).unwrap();

        let json = serde_json::to_string(&pair).unwrap();
        assert!(json.contains("\"name\":\"quiet\""));
        assert!(!json.contains("private"));
        assert!(!format!("{:?}", pair).contains("private_key"));
    }
}
