//! Per-session state
//!
//! A session owns the uploaded document, its vector index and the chat
//! transcript. Nothing outlives the session: ending it (or letting it
//! expire) drops the index and deletes the uploaded file.
//!
//! Each session has two locks. The state lock guards the fields above and
//! is only held for short, non-blocking sections. The work lock serialises
//! uploads and questions and is held across embedding and LLM calls, so
//! lookups and transcript reads never queue behind a slow answer.

use crate::errors::{AppError, Result};
use crate::index::VectorIndex;
use crate::memory::ConversationMemory;
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Metadata about an indexed document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub file_name: String,

    /// Where the upload lives on disk for the session's lifetime
    #[serde(skip)]
    pub path: PathBuf,

    /// Hex SHA-256 of the file contents
    pub sha256: String,

    pub page_count: usize,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

/// An uploaded document and its index
#[derive(Debug, Clone)]
pub struct SessionDocument {
    pub info: DocumentInfo,
    pub index: Arc<VectorIndex>,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub document: Option<SessionDocument>,
    pub memory: ConversationMemory,
    closed: bool,
}

impl Session {
    fn new(id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_active_at: now,
            expires_at: now + ttl_delta(ttl),
            document: None,
            memory: ConversationMemory::new(),
            closed: false,
        }
    }

    /// Set once the session has been ended or expired
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Record activity and push the expiry out by `ttl`
    pub fn touch(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.last_active_at = now;
        self.expires_at = now + ttl_delta(ttl);
    }

    /// The session's index; questions can't be answered before one exists
    pub fn require_index(&self) -> Result<Arc<VectorIndex>> {
        self.document
            .as_ref()
            .map(|d| d.index.clone())
            .ok_or_else(|| AppError::DocumentNotIndexed {
                session_id: self.id.to_string(),
            })
    }
}

fn ttl_delta(ttl: Duration) -> chrono::Duration {
    chrono::Duration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64)
}

/// A registered session and its locks
#[derive(Debug)]
pub struct SessionEntry {
    state: Mutex<Session>,
    work: Mutex<()>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            work: Mutex::new(()),
        }
    }

    /// Access the session's fields; never hold this across an upstream call
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().await
    }

    /// Wait for exclusive use of the session for an upload or a question
    pub async fn begin_work(&self) -> MutexGuard<'_, ()> {
        self.work.lock().await
    }

    fn is_busy(&self) -> bool {
        self.work.try_lock().is_err()
    }
}

pub type SessionHandle = Arc<SessionEntry>;

/// In-memory session registry
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    ttl: Duration,
    upload_root: PathBuf,
}

impl SessionStore {
    pub fn new(ttl: Duration, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            upload_root: upload_root.into(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a new, empty session
    pub async fn create(&self) -> SessionHandle {
        let id = Uuid::new_v4();
        let handle = Arc::new(SessionEntry::new(Session::new(id, self.ttl)));

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, handle.clone());
        metrics::set_active_sessions(sessions.len());

        tracing::info!(session_id = %id, "Session created");
        handle
    }

    /// Look up a live session and mark it active
    pub async fn get(&self, id: Uuid) -> Result<SessionHandle> {
        let handle = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;

        let expired = {
            let mut session = handle.lock().await;
            if session.is_expired() {
                true
            } else {
                session.touch(self.ttl);
                false
            }
        };

        if expired {
            self.discard(id).await;
            return Err(AppError::SessionNotFound { id: id.to_string() });
        }
        Ok(handle)
    }

    /// Keep a session alive without otherwise using it
    pub async fn touch(&self, id: Uuid) -> Result<()> {
        self.get(id).await.map(|_| ())
    }

    /// End a session, dropping its index and deleting its upload
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        if self.discard(id).await {
            tracing::info!(session_id = %id, "Session ended");
            Ok(())
        } else {
            Err(AppError::SessionNotFound { id: id.to_string() })
        }
    }

    /// Remove every expired session; returns how many were removed.
    ///
    /// Sessions busy with an upload or a question are live by definition and skipped.
    pub async fn purge_expired(&self) -> usize {
        let candidates: Vec<(Uuid, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, handle)| !handle.is_busy())
                .map(|(id, handle)| (*id, handle.clone()))
                .collect()
        };

        let mut expired = Vec::new();
        for (id, handle) in candidates {
            if handle.lock().await.is_expired() {
                expired.push(id);
            }
        }

        for id in &expired {
            self.discard(*id).await;
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired sessions purged");
        }
        expired.len()
    }

    /// Periodically purge expired sessions
    pub fn spawn_reaper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.purge_expired().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Directory holding a session's uploads
    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.upload_root.join(id.to_string())
    }

    /// Destination for an uploaded file, stripped of any client-side directories
    pub fn upload_path(&self, id: Uuid, file_name: &str) -> PathBuf {
        self.session_dir(id).join(sanitize_file_name(file_name))
    }

    /// Attach an indexed document to a session.
    ///
    /// Fails with `SessionNotFound` if the session ended while the document
    /// was being written or indexed; the late upload is removed from disk.
    pub async fn attach_document(
        &self,
        handle: &SessionHandle,
        document: SessionDocument,
    ) -> Result<DocumentInfo> {
        let mut session = handle.lock().await;
        if session.closed {
            let id = session.id;
            drop(session);
            self.remove_uploads(id).await;
            return Err(AppError::SessionNotFound { id: id.to_string() });
        }

        let info = document.info.clone();
        session.document = Some(document);
        Ok(info)
    }

    /// Drop a file whose indexing failed, and its directory too if the
    /// session has ended meanwhile
    pub async fn abandon_upload(&self, handle: &SessionHandle, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove rejected upload");
        }

        let session = handle.lock().await;
        if session.closed {
            let id = session.id;
            drop(session);
            self.remove_uploads(id).await;
        }
    }

    async fn discard(&self, id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(&id);
            metrics::set_active_sessions(sessions.len());
            removed
        };

        // Closed before the directory goes, so an upload finishing later
        // sees the flag and cleans up after itself
        if let Some(handle) = &removed {
            handle.lock().await.closed = true;
        }
        self.remove_uploads(id).await;

        removed.is_some()
    }

    async fn remove_uploads(&self, id: Uuid) {
        let dir = self.session_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!(path = %dir.display(), "Upload directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %dir.display(), error = %e, "Failed to remove upload directory"),
        }
    }
}

/// Keep only the final path component and replace characters that are
/// awkward on common filesystems
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    // Windows-style separators survive Path::file_name on unix
    let base = base.rsplit('\\').next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DistanceMetric;

    fn document(dir: &Path) -> SessionDocument {
        SessionDocument {
            info: DocumentInfo {
                file_name: "a.pdf".to_string(),
                path: dir.join("a.pdf"),
                sha256: "00".to_string(),
                page_count: 1,
                chunk_count: 0,
                indexed_at: Utc::now(),
            },
            index: Arc::new(VectorIndex::new(4, DistanceMetric::L2)),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());

        let handle = store.create().await;
        let id = handle.lock().await.id;

        let fetched = store.get(id).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &fetched));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_touch_extends_expiry() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;
        let (id, before) = {
            let session = handle.lock().await;
            (session.id, session.expires_at)
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.touch(id).await.unwrap();

        let session = handle.lock().await;
        assert!(session.expires_at >= before);
        assert!(session.last_active_at > session.created_at);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = SessionStore::new(Duration::from_secs(60), "uploads");
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_expired_session_is_gone() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::ZERO, root.path());

        let id = store.create().await.lock().await.id;
        assert!(matches!(
            store.get(id).await,
            Err(AppError::SessionNotFound { .. })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::ZERO, root.path());
        store.create().await;
        store.create().await;

        assert_eq!(store.purge_expired().await, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_deletes_upload() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let id = store.create().await.lock().await.id;

        let path = store.upload_path(id, "report.pdf");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        store.remove(id).await.unwrap();
        assert!(!path.exists());
        assert!(!store.session_dir(id).exists());
        assert!(matches!(
            store.remove(id).await,
            Err(AppError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_required_before_questions() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;
        let mut session = handle.lock().await;

        assert!(matches!(
            session.require_index(),
            Err(AppError::DocumentNotIndexed { .. })
        ));

        session.document = Some(document(root.path()));
        assert!(session.require_index().is_ok());
    }

    #[tokio::test]
    async fn test_lookup_does_not_wait_for_work() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;
        let id = handle.lock().await.id;

        let _work = handle.begin_work().await;
        let fetched = tokio::time::timeout(Duration::from_secs(1), store.get(id))
            .await
            .expect("lookup queued behind in-flight work")
            .unwrap();
        assert_eq!(fetched.lock().await.memory.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_purge_skips_busy_sessions() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::ZERO, root.path());
        let handle = store.create().await;

        let work = handle.begin_work().await;
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.len().await, 1);

        drop(work);
        assert_eq!(store.purge_expired().await, 1);
        assert!(handle.lock().await.is_closed());
    }

    #[tokio::test]
    async fn test_attach_document() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;

        let info = store
            .attach_document(&handle, document(root.path()))
            .await
            .unwrap();
        assert_eq!(info.file_name, "a.pdf");
        assert!(handle.lock().await.require_index().is_ok());
    }

    #[tokio::test]
    async fn test_upload_finishing_after_end_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;
        let id = handle.lock().await.id;

        store.remove(id).await.unwrap();

        // the in-flight upload writes its file after the directory was removed
        let path = store.upload_path(id, "late.pdf");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let err = store
            .attach_document(&handle, document(root.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound { .. }));
        assert!(!store.session_dir(id).exists());
        assert!(handle.lock().await.document.is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_after_end_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Duration::from_secs(60), root.path());
        let handle = store.create().await;
        let id = handle.lock().await.id;

        store.remove(id).await.unwrap();

        let path = store.upload_path(id, "broken.pdf");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        store.abandon_upload(&handle, &path).await;
        assert!(!store.session_dir(id).exists());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\cv.pdf"), "cv.pdf");
        assert_eq!(sanitize_file_name("q3 results (final).pdf"), "q3 results _final_.pdf");
        assert_eq!(sanitize_file_name(".."), "document.pdf");
    }
}
