//! Durable JSON session store with atomic replace.
//!
//! [`SessionStateStore`] performs the raw load → mutate → save cycle and
//! has no locking of its own. [`SharedStateStore`] is the process-wide
//! handle every caller goes through: it serializes each logical
//! operation behind one async mutex so concurrent mutations cannot lose
//! updates, and runs the file I/O on the blocking pool.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::state::{ChatMessage, Preference, Role, SessionPrefs, StateDocument};
use crate::{AppError, Result};

/// Unsynchronized store bound to one document path.
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    path: PathBuf,
}

impl SessionStateStore {
    /// Create a store for the given document path. Nothing is read yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document.
    ///
    /// A missing file yields a fresh document. A file that cannot be
    /// parsed is renamed to `<path>.corrupt.<unix_ts>` and a fresh
    /// document is returned in its place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` only when the file exists but cannot be
    /// read, or when a corrupt file cannot be moved aside.
    pub fn load(&self) -> Result<StateDocument> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StateDocument::default());
            }
            Err(err) => {
                return Err(AppError::State(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_str::<StateDocument>(&raw) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                let aside = self.quarantine()?;
                warn!(
                    path = %self.path.display(),
                    quarantined = %aside.display(),
                    %err,
                    "state document corrupt, starting fresh"
                );
                Ok(StateDocument::default())
            }
        }
    }

    /// Write the full document atomically.
    ///
    /// The bytes go to a temp file in the target directory which then
    /// replaces the target in one rename; a failure at any point leaves
    /// the previous document untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if serialization, the write, or the
    /// rename fails.
    pub fn save(&self, doc: &StateDocument) -> Result<()> {
        self.save_with(doc, |file, bytes| file.write_all(bytes))
    }

    /// Load, apply `mutate`, and save.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub fn modify<R>(&self, mutate: impl FnOnce(&mut StateDocument) -> R) -> Result<R> {
        let mut doc = self.load()?;
        let out = mutate(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }

    /// Serialized form written by [`save`](Self::save).
    fn encode(doc: &StateDocument) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(doc)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn save_with(
        &self,
        doc: &StateDocument,
        write: impl FnOnce(&mut NamedTempFile, &[u8]) -> io::Result<()>,
    ) -> Result<()> {
        self.write_bytes(&Self::encode(doc)?, write)
    }

    fn write_bytes(
        &self,
        bytes: &[u8],
        write: impl FnOnce(&mut NamedTempFile, &[u8]) -> io::Result<()>,
    ) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir)
            .map_err(|err| AppError::State(format!("failed to create state dir: {err}")))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|err| AppError::State(format!("failed to create temp file: {err}")))?;
        write(&mut tmp, bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| AppError::State(format!("failed to write state: {err}")))?;
        tmp.persist(&self.path)
            .map_err(|err| AppError::State(format!("failed to replace state: {}", err.error)))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "state saved");
        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn quarantine(&self) -> Result<PathBuf> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt.{}", Utc::now().timestamp()));
        let aside = PathBuf::from(name);
        fs::rename(&self.path, &aside)
            .map_err(|err| AppError::State(format!("failed to quarantine corrupt state: {err}")))?;
        Ok(aside)
    }
}

/// Process-wide, lock-serialized handle to the session store.
#[derive(Debug, Clone)]
pub struct SharedStateStore {
    inner: Arc<Mutex<SessionStateStore>>,
}

impl SharedStateStore {
    /// Wrap a store for shared use.
    #[must_use]
    pub fn new(store: SessionStateStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run one load → mutate → save sequence under the store lock.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub async fn modify<R>(&self, mutate: impl FnOnce(&mut StateDocument) -> R) -> Result<R> {
        let store = self.inner.lock().await;
        let mut doc = load_blocking(&store).await?;
        let out = mutate(&mut doc);
        let bytes = SessionStateStore::encode(&doc)?;
        let writer = store.clone();
        off_thread(move || writer.write_bytes(&bytes, |file, data| file.write_all(data))).await?;
        Ok(out)
    }

    /// Load under the store lock and project a value out of the document.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn read<R>(&self, project: impl FnOnce(&StateDocument) -> R) -> Result<R> {
        let store = self.inner.lock().await;
        let doc = load_blocking(&store).await?;
        Ok(project(&doc))
    }

    /// Identity recorded by the first successful claim.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn claimed_user_id(&self) -> Result<Option<String>> {
        self.read(|doc| doc.claimed_user_id.clone()).await
    }

    /// Record `user_id` as the claimed identity unless one is already set.
    ///
    /// Returns whether this call performed the claim.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub async fn claim(&self, user_id: &str) -> Result<bool> {
        self.modify(|doc| {
            if doc.claimed_user_id.is_some() {
                false
            } else {
                doc.claimed_user_id = Some(user_id.to_owned());
                true
            }
        })
        .await
    }

    /// Truncate a session's history and preferences.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let now = now_ms();
        self.modify(|doc| {
            let record = doc.session_mut(session_id, now);
            record.messages.clear();
            record.prefs.clear();
            record.updated_at_ms = now;
        })
        .await
    }

    /// Append one history entry.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub async fn append(&self, session_id: &str, role: Role, text: &str) -> Result<()> {
        let now = now_ms();
        self.modify(|doc| append_message(doc, session_id, role, text, now))
            .await
    }

    /// Bounded read view of the last `max_turns` turns.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn recent_messages(
        &self,
        session_id: &str,
        max_turns: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.read(|doc| {
            doc.session(session_id)
                .map(|record| record.recent(max_turns).to_vec())
                .unwrap_or_default()
        })
        .await
    }

    /// Typed preferences of a session.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn prefs(&self, session_id: &str) -> Result<SessionPrefs> {
        self.read(|doc| {
            doc.session(session_id)
                .map(crate::models::state::SessionRecord::session_prefs)
                .unwrap_or_default()
        })
        .await
    }

    /// Store one preference.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub async fn set_pref(&self, session_id: &str, pref: Preference) -> Result<()> {
        let now = now_ms();
        let (key, value) = pref.into_entry();
        self.modify(|doc| {
            let record = doc.session_mut(session_id, now);
            record.prefs.insert(key.to_owned(), value);
            record.updated_at_ms = now;
        })
        .await
    }
}

async fn load_blocking(store: &SessionStateStore) -> Result<StateDocument> {
    let store = store.clone();
    off_thread(move || store.load()).await
}

async fn off_thread<T: Send + 'static>(
    work: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::State(format!("state task failed: {err}")))?
}

/// Append a history entry to a loaded document.
pub fn append_message(doc: &mut StateDocument, session_id: &str, role: Role, text: &str, now: i64) {
    let record = doc.session_mut(session_id, now);
    record.messages.push(ChatMessage {
        role,
        text: text.to_owned(),
        ts_ms: now,
    });
    record.updated_at_ms = now;
}

/// Current wall-clock time in Unix epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
