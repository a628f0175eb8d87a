// store.rs — File-backed approval store shared by every process on a host.
//
// The store is a pretty-printed JSON array of `ApprovalRequest` records.
// Writers never hold state in memory: every operation takes an exclusive
// lock on a sidecar `<store>.lock` file, reloads the array, applies its
// change, and writes the result through a temp file + rename. A dashboard,
// the CLI and any number of gateway processes can therefore share one store
// without losing updates.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;

use permiscope_policy::Params;

use crate::error::ApprovalError;
use crate::request::{expiry_after, request_key, ApprovalRequest, ApprovalStatus};

/// Default lifetime of an approval grant.
pub const DEFAULT_TTL_SECS: i64 = 60 * 60;

/// How hard to try for the store lock before giving up.
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub attempts: u32,
    pub delay: StdDuration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 100,
            delay: StdDuration::from_millis(20),
        }
    }
}

/// Held for the duration of one store operation.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release approval store lock");
        }
    }
}

/// Persistent approval store.
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    path: PathBuf,
    lock_path: PathBuf,
    ttl: Duration,
    retry: LockRetry,
}

impl ApprovalStore {
    /// Open (or prepare to create) a store at the given path.
    ///
    /// The parent directory is created if missing. The store file itself is
    /// only written on the first change.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ApprovalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ApprovalError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self {
            lock_path: sibling(&path, ".lock"),
            path,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            retry: LockRetry::default(),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_lock_retry(mut self, retry: LockRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that an intent needs approval.
    ///
    /// Idempotent per intent: a pending record or a live grant is returned
    /// unchanged. A missing record is created as PENDING; an expired grant or
    /// an earlier rejection is re-opened as PENDING.
    pub fn request_approval(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let key = request_key(agent_id, action_name, params);
        let ttl = self.ttl;
        self.transact(|records, now| {
            let Some(index) = records.iter().position(|r| r.id == key) else {
                let record =
                    ApprovalRequest::new(agent_id, action_name, params, ApprovalStatus::Pending, now);
                tracing::info!(
                    id = %record.id,
                    agent_id = %agent_id,
                    action = %action_name,
                    "approval requested"
                );
                records.push(record.clone());
                return (record, true);
            };
            let existing = &mut records[index];
            let live_grant = existing.status == ApprovalStatus::Approved
                && !existing.is_expired_grant(now, ttl);
            if existing.status == ApprovalStatus::Pending || live_grant {
                return (existing.clone(), false);
            }
            tracing::debug!(id = %existing.id, previous = %existing.status, "re-opening approval request");
            existing.status = ApprovalStatus::Pending;
            existing.timestamp = now;
            existing.expires_at = None;
            (existing.clone(), true)
        })
    }

    /// Grant an intent for one TTL, creating the record if needed.
    pub fn approve(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.upsert(agent_id, action_name, params, ApprovalStatus::Approved)
    }

    /// Reject an intent, creating the record if needed.
    pub fn reject(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.upsert(agent_id, action_name, params, ApprovalStatus::Rejected)
    }

    /// Decide an existing request by id. Used by operators (CLI, dashboard).
    ///
    /// Returns `Ok(None)` if no such request exists. Moving a request back to
    /// PENDING is not allowed.
    pub fn update_status(
        &self,
        id: &str,
        status: ApprovalStatus,
    ) -> Result<Option<ApprovalRequest>, ApprovalError> {
        if status == ApprovalStatus::Pending {
            return Err(ApprovalError::InvalidTransition {
                id: id.to_string(),
                status,
            });
        }
        let ttl = self.ttl;
        self.transact(|records, now| match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                apply_status(record, status, now, ttl);
                tracing::info!(id = %id, status = %status, "approval request decided");
                (Some(record.clone()), true)
            }
            None => (None, false),
        })
    }

    /// Current status of an intent, or `None` if there is no record.
    ///
    /// An expired grant is evicted on the spot and reported as `None`.
    pub fn status(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<Option<ApprovalStatus>, ApprovalError> {
        let key = request_key(agent_id, action_name, params);
        let ttl = self.ttl;
        self.transact(|records, now| match records.iter().position(|r| r.id == key) {
            Some(i) if records[i].is_expired_grant(now, ttl) => {
                let evicted = records.remove(i);
                tracing::debug!(id = %evicted.id, "evicted expired approval grant");
                (None, true)
            }
            Some(i) => (Some(records[i].status), false),
            None => (None, false),
        })
    }

    /// True only for a live (unexpired) grant.
    pub fn is_approved(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<bool, ApprovalError> {
        Ok(self.status(agent_id, action_name, params)? == Some(ApprovalStatus::Approved))
    }

    pub fn is_rejected(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
    ) -> Result<bool, ApprovalError> {
        Ok(self.status(agent_id, action_name, params)? == Some(ApprovalStatus::Rejected))
    }

    /// Remove one request by id. Returns whether anything was removed.
    pub fn revoke(&self, id: &str) -> Result<bool, ApprovalError> {
        self.transact(|records, _| {
            let before = records.len();
            records.retain(|r| r.id != id);
            let removed = records.len() != before;
            if removed {
                tracing::info!(id = %id, "approval request revoked");
            }
            (removed, removed)
        })
    }

    /// Revoke every grant for an action name, whatever agent or parameters.
    pub fn revoke_action(&self, action_name: &str) -> Result<usize, ApprovalError> {
        self.transact(|records, _| {
            let before = records.len();
            records.retain(|r| !(r.action_name == action_name && r.status == ApprovalStatus::Approved));
            let removed = before - records.len();
            if removed > 0 {
                tracing::info!(action = %action_name, count = removed, "approval grants revoked");
            }
            (removed, removed > 0)
        })
    }

    /// Drop every expired grant. Returns how many were removed.
    pub fn clear_expired(&self) -> Result<usize, ApprovalError> {
        let ttl = self.ttl;
        self.transact(|records, now| {
            let before = records.len();
            records.retain(|r| !r.is_expired_grant(now, ttl));
            let removed = before - records.len();
            (removed, removed > 0)
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<ApprovalRequest>, ApprovalError> {
        self.transact(|records, _| (records.iter().find(|r| r.id == id).cloned(), false))
    }

    /// All records in store order.
    pub fn get_all(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.transact(|records, _| (records.clone(), false))
    }

    fn upsert(
        &self,
        agent_id: &str,
        action_name: &str,
        params: &Params,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let key = request_key(agent_id, action_name, params);
        let ttl = self.ttl;
        self.transact(|records, now| {
            let index = match records.iter().position(|r| r.id == key) {
                Some(i) => i,
                None => {
                    records.push(ApprovalRequest::new(agent_id, action_name, params, status, now));
                    records.len() - 1
                }
            };
            let record = &mut records[index];
            apply_status(record, status, now, ttl);
            tracing::info!(
                id = %record.id,
                agent_id = %agent_id,
                action = %action_name,
                status = %status,
                "approval request decided"
            );
            (record.clone(), true)
        })
    }

    /// Lock, reload, apply `f`, and write back if `f` reports a change.
    fn transact<T, F>(&self, f: F) -> Result<T, ApprovalError>
    where
        F: FnOnce(&mut Vec<ApprovalRequest>, DateTime<Utc>) -> (T, bool),
    {
        let _lock = self.lock()?;
        let mut records = self.load()?;
        let (out, dirty) = f(&mut records, Utc::now());
        if dirty {
            self.save(&records)?;
        }
        Ok(out)
    }

    fn lock(&self) -> Result<StoreLock, ApprovalError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| ApprovalError::Io {
                path: self.lock_path.clone(),
                source,
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(StoreLock { file }),
                Err(_) if attempt >= self.retry.attempts => {
                    return Err(ApprovalError::LockTimeout {
                        path: self.lock_path.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    tracing::trace!(attempt, error = %e, "approval store busy, retrying");
                    std::thread::sleep(self.retry.delay);
                }
            }
        }
    }

    fn load(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ApprovalError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|source| {
            tracing::error!(path = %self.path.display(), error = %source, "approval store is corrupt");
            ApprovalError::CorruptStore {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn save(&self, records: &[ApprovalRequest]) -> Result<(), ApprovalError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = sibling(&self.path, ".tmp");
        let io_err = |source| ApprovalError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|source| ApprovalError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn apply_status(
    record: &mut ApprovalRequest,
    status: ApprovalStatus,
    now: DateTime<Utc>,
    ttl: Duration,
) {
    record.status = status;
    record.expires_at = match status {
        ApprovalStatus::Approved => Some(expiry_after(now, ttl)),
        _ => None,
    };
}

/// `approvals.json` → `approvals.json.lock` (or `.tmp`).
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
