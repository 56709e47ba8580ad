//! Durable session store.
//!
//! One JSON file per session under the configured session directory. The
//! file format survives process restarts, so independent transport
//! processes observe the same session state. Writers serialise on an
//! in-process mutex and every write is a whole-file atomic replacement
//! (write to a temp file in the same directory, then rename), so readers
//! never observe a partially written record; any file that fails to parse
//! reads as a miss.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Session lifecycle state.
///
/// Transitions are monotone: `INITIALIZING → OPEN → CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// `initialize` accepted, waiting for `notifications/initialized`.
    Initializing,
    /// Handshake complete; requests are dispatched.
    Open,
    /// Closed by the client, end-of-stream, or the reaper.
    Closed,
}

impl SessionStatus {
    /// Position along the lifecycle, used to refuse backward transitions.
    const fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }
}

/// Persisted per-session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// 128-bit identifier rendered as 32 lowercase hex digits.
    pub session_id: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Wall-clock seconds when the session was created.
    pub opened_at: u64,
    /// Wall-clock seconds when the session was closed, otherwise 0.
    pub closed_at: u64,
    /// Opaque client-supplied info from `initialize`.
    pub client_info: Value,
    /// Negotiated protocol version; immutable after creation.
    pub protocol_version: String,
}

impl SessionRecord {
    /// Creates a fresh `INITIALIZING` record.
    #[must_use]
    pub fn new(session_id: String, opened_at: u64, client_info: Value, protocol_version: String) -> Self {
        Self {
            session_id,
            status: SessionStatus::Initializing,
            opened_at,
            closed_at: 0,
            client_info,
            protocol_version,
        }
    }
}

/// File-backed session store.
pub struct SessionStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl SessionStore {
    /// Opens (and creates if missing) the session directory.
    ///
    /// On Unix the directory is created with mode `0o700`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.exists() {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(&dir).map_err(|e| StoreError::Directory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// The directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Writes a new record. Fails if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already on disk or the write fails.
    pub fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(&record.session_id);
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                session: record.session_id.clone(),
            });
        }
        self.write_record(&path, record)
    }

    /// Reads a record, treating missing or malformed files as a miss.
    #[must_use]
    pub fn read(&self, session_id: &str) -> Option<SessionRecord> {
        let path = self.path_for(session_id);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<SessionRecord>(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session = %session_id, error = %e, "malformed session file");
                None
            }
        }
    }

    /// Moves a session to `new_status`, returning the prior status.
    ///
    /// Sets `closedAt` when moving to `CLOSED`. Backward transitions are
    /// refused (the record is left untouched and the prior status
    /// returned). Returns `None` when the session cannot be verified.
    pub fn update(&self, session_id: &str, new_status: SessionStatus, now: u64) -> Option<SessionStatus> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut record = self.read(session_id)?;
        let prior = record.status;

        if new_status.rank() <= prior.rank() {
            return Some(prior);
        }

        record.status = new_status;
        if new_status == SessionStatus::Closed {
            record.closed_at = now;
        }

        match self.write_record(&self.path_for(session_id), &record) {
            Ok(()) => Some(prior),
            Err(e) => {
                warn!(session = %session_id, error = %e, "failed to update session");
                None
            }
        }
    }

    /// Every session id currently on disk, including closed ones.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let stem = name.strip_suffix(".json")?;
                is_session_id(stem).then(|| stem.to_string())
            })
            .collect()
    }

    /// Sweeps stale sessions.
    ///
    /// For each session on disk:
    /// - older than `2 × max_uptime` → delete the file;
    /// - `INITIALIZING` and older than `init_timeout` → delete the file;
    /// - not yet `CLOSED` and older than `max_uptime` → move to `CLOSED`.
    ///
    /// Applying the sweep twice in a row has the same effect as once.
    pub fn reap(&self, now: u64, max_uptime: u64, init_timeout: u64) {
        for session_id in self.list() {
            let Some(record) = self.read(&session_id) else {
                continue;
            };
            let age = now.saturating_sub(record.opened_at);

            if age > 2 * max_uptime {
                self.remove(&session_id);
            } else if record.status == SessionStatus::Initializing && age > init_timeout {
                debug!(session = %session_id, "initialize handshake timed out");
                self.remove(&session_id);
            } else if record.status != SessionStatus::Closed && age > max_uptime {
                debug!(session = %session_id, "session exceeded max uptime");
                self.update(&session_id, SessionStatus::Closed, now);
            }
        }
    }

    fn remove(&self, session_id: &str) {
        if let Err(e) = std::fs::remove_file(self.path_for(session_id)) {
            warn!(session = %session_id, error = %e, "failed to delete session file");
        }
    }

    fn write_record(&self, path: &Path, record: &SessionRecord) -> Result<(), StoreError> {
        let contents = serde_json::to_vec(record).map_err(|e| StoreError::Encode {
            session: record.session_id.clone(),
            source: e,
        })?;
        let io_err = |e: std::io::Error| StoreError::Io {
            session: record.session_id.clone(),
            source: e,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        std::io::Write::write_all(&mut tmp, &contents).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Whether `s` looks like a session id: 32 lowercase hex digits.
#[must_use]
pub fn is_session_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
