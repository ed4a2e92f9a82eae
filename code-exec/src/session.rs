//! Named sessions holding files between executions.
//!
//! Each session sits behind its own async mutex, so operations on one session
//! are serialized while different sessions proceed independently. Runs work
//! on a snapshot taken under that mutex.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ExecConfig;
use crate::encoding::{decode_file, normalize_file_name, validate_relative_path};
use crate::error::Error;
use crate::types::{File, Language};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub language: Language,
    files: BTreeMap<String, Vec<u8>>,
    working_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Session {
    fn new(id: String, language: Language) -> Self {
        let now = Utc::now();
        Self {
            id,
            language,
            files: BTreeMap::new(),
            working_dir: None,
            created_at: now,
            last_used: now,
        }
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        let name = normalize_file_name(name).ok()?;
        self.files.get(&name).map(Vec::as_slice)
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    fn touch(&mut self) {
        self.last_used = Utc::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        (Utc::now() - self.last_used)
            .to_std()
            .map(|idle| idle > ttl)
            .unwrap_or(false)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            language: self.language,
            files: self.files.keys().cloned().collect(),
            working_dir: self.working_dir.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

/// A file may not share its name with a directory made by another file.
///
/// Returns the stored name `name` clashes with. Names must be canonical.
pub(crate) fn conflicting_path<'a, V>(
    files: &'a BTreeMap<String, V>,
    name: &str,
) -> Option<&'a str> {
    let as_dir = format!("{}/", name);
    if let Some((existing, _)) = files
        .range(as_dir.clone()..)
        .next()
        .filter(|(existing, _)| existing.starts_with(&as_dir))
    {
        return Some(existing.as_str());
    }
    name.match_indices('/').find_map(|(i, _)| {
        files
            .get_key_value(&name[..i])
            .map(|(existing, _)| existing.as_str())
    })
}

/// Serializable summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub language: Language,
    pub files: Vec<String>,
    pub working_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

pub type SessionGuard = OwnedMutexGuard<Session>;

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Mutex<Session>>>>,
    /// `None` disables idle eviction.
    ttl: Option<Duration>,
    max_sessions: usize,
    max_file_size: usize,
}

impl SessionManager {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: (config.session_ttl_secs > 0).then(|| config.session_ttl()),
            max_sessions: config.max_sessions,
            max_file_size: config.max_file_size_bytes,
        }
    }

    pub fn create(&self, id: impl Into<String>, language: Language) -> Result<(), Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("session id is empty".to_string()));
        }

        self.evict_expired();
        if self.sessions.len() >= self.max_sessions {
            return Err(Error::LimitExceeded(format!(
                "at most {} sessions may be open",
                self.max_sessions
            )));
        }

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(Session::new(id.clone(), language))));
                info!(session = %id, %language, "Session created");
                Ok(())
            }
        }
    }

    /// Creates a session under a fresh random id and returns the id.
    pub fn create_anonymous(&self, language: Language) -> Result<String, Error> {
        let id = Uuid::new_v4().to_string();
        self.create(id.clone(), language)?;
        Ok(id)
    }

    fn handle(&self, id: &str) -> Result<Arc<Mutex<Session>>, Error> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::session_not_found(id))
    }

    /// Snapshot of the session's current state.
    pub async fn get(&self, id: &str) -> Result<Session, Error> {
        let guard = self.get_mut(id).await?;
        Ok(guard.clone())
    }

    /// Exclusive access to the session until the guard is dropped.
    pub async fn get_mut(&self, id: &str) -> Result<SessionGuard, Error> {
        let mut guard = self.handle(id)?.lock_owned().await;
        guard.touch();
        Ok(guard)
    }

    /// Removes the session, waiting for any operation in progress on it.
    pub async fn remove(&self, id: &str) -> Result<Session, Error> {
        let (_, handle) = self
            .sessions
            .remove(id)
            .ok_or_else(|| Error::session_not_found(id))?;
        let session = handle.lock().await.clone();
        info!(session = %id, "Session removed");
        Ok(session)
    }

    /// Stores `file`, replacing any file of the same name.
    ///
    /// Names are stored canonicalized, so `./a.py` replaces `a.py`.
    pub async fn upload(&self, id: &str, file: File) -> Result<(), Error> {
        let name = normalize_file_name(&file.name)?;
        let content = decode_file(&file)?;
        if content.len() > self.max_file_size {
            return Err(Error::InvalidInput(format!(
                "file '{}' is {} bytes, limit is {}",
                file.name,
                content.len(),
                self.max_file_size
            )));
        }

        let mut session = self.get_mut(id).await?;
        if let Some(existing) = conflicting_path(&session.files, &name) {
            return Err(Error::InvalidInput(format!(
                "file '{}' conflicts with '{}'",
                file.name, existing
            )));
        }
        debug!(session = %id, file = %name, bytes = content.len(), "File uploaded");
        session.files.insert(name, content);
        Ok(())
    }

    pub async fn remove_file(&self, id: &str, name: &str) -> Result<(), Error> {
        let key = normalize_file_name(name)?;
        let mut session = self.get_mut(id).await?;
        session
            .files
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::file_not_found(name))
    }

    pub async fn download(&self, id: &str, name: &str) -> Result<Vec<u8>, Error> {
        normalize_file_name(name)?;
        let session = self.get_mut(id).await?;
        session
            .file(name)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::file_not_found(name))
    }

    /// Immediate children of `dir`. Sub-directories carry a trailing `/`.
    pub async fn list_files(&self, id: &str, dir: &str) -> Result<Vec<String>, Error> {
        validate_relative_path(dir)?;
        let prefix = normalize_dir(dir).map(|dir| format!("{}/", dir));

        let session = self.get_mut(id).await?;
        let children: BTreeSet<String> = session
            .files
            .keys()
            .filter_map(|name| match &prefix {
                Some(prefix) => name.strip_prefix(prefix.as_str()),
                None => Some(name.as_str()),
            })
            .map(|rest| match rest.split_once('/') {
                Some((child, _)) => format!("{}/", child),
                None => rest.to_string(),
            })
            .collect();

        if children.is_empty() && prefix.is_some() {
            return Err(Error::NotFound(format!("directory '{}'", dir)));
        }
        Ok(children.into_iter().collect())
    }

    /// Sets the directory runs start in, relative to the sandbox root.
    pub async fn set_working_dir(&self, id: &str, path: &str) -> Result<(), Error> {
        validate_relative_path(path)?;
        let mut session = self.get_mut(id).await?;
        session.working_dir = normalize_dir(path);
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.lock().await.info());
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions idle for longer than the TTL. Sessions in use are kept.
    pub fn evict_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let expired = |handle: &Arc<Mutex<Session>>| {
            handle
                .try_lock()
                .map(|session| session.is_expired(ttl))
                .unwrap_or(false)
        };

        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in candidates {
            if self.sessions.remove_if(&id, |_, handle| expired(handle)).is_some() {
                debug!(session = %id, "Session evicted after idle timeout");
                evicted += 1;
            }
        }
        evicted
    }

    /// Runs [`Self::evict_expired`] every `period` until the handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = manager.evict_expired();
                if evicted > 0 {
                    info!("Evicted {} idle sessions", evicted);
                }
            }
        })
    }
}

fn normalize_dir(dir: &str) -> Option<String> {
    let parts: Vec<&str> = dir
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
