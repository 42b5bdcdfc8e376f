//! SQLite persistence for review sessions.
//!
//! A session is stored as one row per entity, question and digest, plus a
//! session row holding the window, pending affect and counters:
//!
//! ```sql
//! CREATE TABLE sessions  (session_id TEXT PRIMARY KEY, data BLOB, updated_at TEXT, checksum TEXT);
//! CREATE TABLE entities  (session_id, entity_id,   position, data, checksum);
//! CREATE TABLE questions (session_id, question_id, position, data, checksum);
//! CREATE TABLE digests   (session_id, scene_number, scene_id, data, checksum);
//! ```
//!
//! Every payload is JSON in a BLOB column with an optional CRC-32 beside it.
//! WAL mode is enabled by default, and backups go through SQLite's
//! online-backup API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::PersistenceConfig;
use crate::entity::Entity;
use crate::error::{Result, SceneMindError};
use crate::memory::SceneDigest;
use crate::metrics::spans;
use crate::question::Question;
use crate::session::{SessionSnapshot, SessionState};
use crate::types::SessionId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);
CREATE TABLE IF NOT EXISTS entities (
    session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    entity_id  TEXT NOT NULL,
    position   INTEGER NOT NULL,
    data       BLOB NOT NULL,
    checksum   TEXT,
    PRIMARY KEY (session_id, entity_id)
);
CREATE TABLE IF NOT EXISTS questions (
    session_id  TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    question_id TEXT NOT NULL,
    position    INTEGER NOT NULL,
    data        BLOB NOT NULL,
    checksum    TEXT,
    PRIMARY KEY (session_id, question_id)
);
CREATE TABLE IF NOT EXISTS digests (
    session_id   TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    scene_number INTEGER NOT NULL,
    scene_id     TEXT NOT NULL,
    data         BLOB NOT NULL,
    checksum     TEXT,
    PRIMARY KEY (session_id, scene_number)
);";

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309 polynomial, reflected).
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Handle to an open session database.
///
/// ```no_run
/// # use scenemind_core::persistence::SessionStore;
/// # use scenemind_core::config::{PersistenceConfig, SceneMindConfig};
/// # use scenemind_core::session::NarrativeSession;
/// let store = SessionStore::open("reviews.db", &PersistenceConfig::default())?;
/// let session = NarrativeSession::new(SceneMindConfig::default())?;
/// store.save_session(&session.snapshot())?;
/// let loaded = store.load_session(&session.id())?;
/// # Ok::<(), scenemind_core::error::SceneMindError>(())
/// ```
pub struct SessionStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "Session store opened");
        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<(Vec<u8>, Option<String>)> {
        let json = serde_json::to_vec(value).map_err(|e| SceneMindError::Serialization(e.to_string()))?;
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(&json));
        Ok((json, checksum))
    }

    fn decode<T: DeserializeOwned>(&self, what: &str, data: &[u8], stored: Option<&str>) -> Result<T> {
        if self.config.checksum_enabled {
            if let Some(expected) = stored {
                let actual = crc32_hex(data);
                if expected != actual {
                    warn!(row = what, expected = %expected, actual = %actual, "Checksum mismatch, possible save corruption");
                }
            }
        }
        serde_json::from_slice(data).map_err(|e| SceneMindError::Serialization(format!("{what}: {e}")))
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Save (upsert) a whole session in one transaction.
    ///
    /// # Errors
    /// [`SceneMindError::Serialization`] or [`SceneMindError::Database`].
    pub fn save_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let _span = info_span!(spans::PERSIST_SAVE).entered();
        let start = Instant::now();
        let sid = snapshot.state.session_id.to_string();
        let tx = self.conn.unchecked_transaction()?;

        let (state, checksum) = self.encode(&snapshot.state)?;
        tx.execute(
            "INSERT INTO sessions (session_id, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![sid, state, Utc::now().to_rfc3339(), checksum],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO entities (session_id, entity_id, position, data, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, entity_id) DO UPDATE SET
                    position = excluded.position, data = excluded.data, checksum = excluded.checksum",
            )?;
            for (i, entity) in snapshot.entities.iter().enumerate() {
                let (data, checksum) = self.encode(entity)?;
                stmt.execute(params![sid, entity.entity_id.as_str(), i64_from(i), data, checksum])?;
            }
        }
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO questions (session_id, question_id, position, data, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, question_id) DO UPDATE SET
                    position = excluded.position, data = excluded.data, checksum = excluded.checksum",
            )?;
            for (i, question) in snapshot.questions.iter().enumerate() {
                let (data, checksum) = self.encode(question)?;
                stmt.execute(params![sid, question.question_id.as_str(), i64_from(i), data, checksum])?;
            }
        }
        {
            // Digests are immutable once written.
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO digests (session_id, scene_number, scene_id, data, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for digest in &snapshot.digests {
                let (data, checksum) = self.encode(digest)?;
                stmt.execute(params![sid, digest.scene_number, digest.scene_id, data, checksum])?;
            }
        }
        tx.commit()?;

        debug!(
            session = %snapshot.state.session_id,
            scene = snapshot.state.current_scene,
            entities = snapshot.entities.len(),
            questions = snapshot.questions.len(),
            digests = snapshot.digests.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved session"
        );
        Ok(())
    }

    /// Load a session, or `None` if it was never saved.
    ///
    /// # Errors
    /// [`SceneMindError::Serialization`] or [`SceneMindError::Database`].
    pub fn load_session(&self, id: &SessionId) -> Result<Option<SessionSnapshot>> {
        let _span = info_span!(spans::PERSIST_LOAD).entered();
        let sid = id.to_string();

        let row: Option<(Vec<u8>, Option<String>)> = self
            .conn
            .prepare_cached("SELECT data, checksum FROM sessions WHERE session_id = ?1")?
            .query_row(params![sid], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((data, checksum)) = row else {
            return Ok(None);
        };
        let state: SessionState = self.decode("session", &data, checksum.as_deref())?;

        let entities: Vec<Entity> =
            self.load_rows("entities", "SELECT data, checksum FROM entities WHERE session_id = ?1 ORDER BY position", &sid)?;
        let questions: Vec<Question> =
            self.load_rows("questions", "SELECT data, checksum FROM questions WHERE session_id = ?1 ORDER BY position", &sid)?;
        let digests: Vec<SceneDigest> =
            self.load_rows("digests", "SELECT data, checksum FROM digests WHERE session_id = ?1 ORDER BY scene_number", &sid)?;

        debug!(session = %id, scene = state.current_scene, digests = digests.len(), "Loaded session");
        Ok(Some(SessionSnapshot {
            state,
            entities,
            questions,
            digests,
        }))
    }

    fn load_rows<T: DeserializeOwned>(&self, what: &str, sql: &str, sid: &str) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![sid], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (data, checksum) = row?;
            out.push(self.decode(what, &data, checksum.as_deref())?);
        }
        Ok(out)
    }

    /// Delete a session and all its rows. Returns `true` if it existed.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] on SQLite failures.
    pub fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    /// Every saved session id.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] on SQLite failures.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut stmt = self.conn.prepare_cached("SELECT session_id FROM sessions ORDER BY updated_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row?;
            match uuid::Uuid::parse_str(&raw) {
                Ok(uuid) => ids.push(SessionId(uuid)),
                Err(_) => warn!(id = %raw, "Skipping row with invalid session id"),
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with the online-backup API.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] or [`SceneMindError::Io`].
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Numbered backup beside the database, keeping at most `backup_count`.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] or [`SceneMindError::Io`].
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }
        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }
        for i in (1..max).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                std::fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        self.backup(self.backup_path(1))?;
        info!(max_backups = max, "Rotating backup created");
        Ok(())
    }

    /// `reviews.db` → `reviews.db.bak.N`.
    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension().map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Database path, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `PRAGMA integrity_check`.
    ///
    /// # Errors
    /// [`SceneMindError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self.conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

fn i64_from(i: usize) -> i64 {
    i64::try_from(i).unwrap_or(i64::MAX)
}

/// Adds `.optional()` to `rusqlite::Result`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::AffectRecord;
    use crate::config::SceneMindConfig;
    use crate::scene::SceneRecord;
    use crate::session::{NarrativeSession, RaisedQuestion, ReviewerUpdate};
    use crate::types::{NarrativeWeight, ReviewerId};

    fn test_config() -> PersistenceConfig {
        PersistenceConfig {
            checksum_enabled: true,
            ..PersistenceConfig::default()
        }
    }

    fn played(scenes: u32) -> NarrativeSession {
        let mut session = NarrativeSession::new(SceneMindConfig::default()).expect("session");
        for n in 1..=scenes {
            let scene = SceneRecord::new(n, format!("INT. LAB {n} - DAY"))
                .with_action("The centrifuge hums.")
                .with_dialogue("IRIS", &["Run it again."]);
            session.observe_scene(scene).expect("observe");
            let mut update = ReviewerUpdate::new(ReviewerId::new("critic"), AffectRecord::new(n, 0.6, 0.2));
            if n == 2 {
                update.raised.push(RaisedQuestion {
                    text: "What is Iris testing?".into(),
                    weight: NarrativeWeight::High,
                    about: vec!["IRIS".into()],
                    speculation: None,
                });
            }
            session.apply_update(&update).expect("apply");
            session.commit_scene().expect("commit");
        }
        session
    }

    #[test]
    fn round_trip_save_load() {
        let store = SessionStore::open_in_memory(&test_config()).expect("open");
        let session = played(8);
        let snapshot = session.snapshot();
        store.save_session(&snapshot).expect("save");
        let loaded = store.load_session(&session.id()).expect("load").expect("Some");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let store = SessionStore::open_in_memory(&test_config()).expect("open");
        assert!(store.load_session(&SessionId::new()).expect("load").is_none());
    }

    #[test]
    fn resave_keeps_digests_and_updates_state() {
        let store = SessionStore::open_in_memory(&test_config()).expect("open");
        let mut session = played(6);
        store.save_session(&session.snapshot()).expect("save 1");
        session
            .advance(SceneRecord::new(7, "EXT. LOT - NIGHT").with_action("Rain."))
            .expect("advance");
        store.save_session(&session.snapshot()).expect("save 2");

        let loaded = store.load_session(&session.id()).expect("load").expect("Some");
        assert_eq!(loaded.state.current_scene, 7);
        assert_eq!(loaded.digests.len(), 2);
        assert_eq!(loaded, session.snapshot());
    }

    #[test]
    fn delete_and_list() {
        let store = SessionStore::open_in_memory(&test_config()).expect("open");
        let a = played(1);
        let b = played(2);
        store.save_session(&a.snapshot()).expect("save");
        store.save_session(&b.snapshot()).expect("save");
        assert_eq!(store.list_sessions().expect("list").len(), 2);
        assert!(store.delete_session(&a.id()).expect("delete"));
        assert!(!store.delete_session(&a.id()).expect("delete again"));
        assert_eq!(store.list_sessions().expect("list"), vec![b.id()]);
    }

    #[test]
    fn checksum_mismatch_still_loads() {
        let store = SessionStore::open_in_memory(&test_config()).expect("open");
        let session = played(3);
        store.save_session(&session.snapshot()).expect("save");
        store
            .conn
            .execute("UPDATE sessions SET checksum = 'deadbeef'", [])
            .expect("corrupt checksum");
        assert!(store.load_session(&session.id()).expect("load").is_some());
    }

    #[test]
    fn file_backup_and_rotation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("reviews.db");
        let mut config = test_config();
        config.backup_count = 2;

        let store = SessionStore::open(&db_path, &config).expect("open");
        let session = played(2);
        store.save_session(&session.snapshot()).expect("save");
        assert!(store.integrity_check().expect("check"));

        for _ in 0..3 {
            store.create_rotating_backup().expect("backup");
        }
        assert!(dir.path().join("reviews.db.bak.1").exists());
        assert!(dir.path().join("reviews.db.bak.2").exists());
        assert!(!dir.path().join("reviews.db.bak.3").exists());

        let backup = SessionStore::open(dir.path().join("reviews.db.bak.1"), &config).expect("open backup");
        assert!(backup.load_session(&session.id()).expect("load").is_some());
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32_compute(b"123456789"), 0xCBF4_3926);
    }
}
