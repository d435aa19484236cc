//! Locally persisted identities: the per-room user id and the per-room admin id.

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::SharedClock;

/// Client-side memory of who this client is in each room.
///
/// Storage is best effort: failures are logged and read as "nothing stored".
pub trait IdentityStore: Send + Sync {
    /// User id remembered for `room_id`, if issued within the identity TTL.
    fn user_id(&self, room_id: &str) -> Option<String>;
    /// Remember `user_id` for `room_id`, restarting its TTL.
    fn set_user_id(&self, room_id: &str, user_id: &str);
    /// Admin id remembered for `room_id`. Never expires.
    fn admin_id(&self, room_id: &str) -> Option<String>;
    /// Remember that this client is the admin `user_id` of `room_id`.
    fn set_admin_id(&self, room_id: &str, user_id: &str);
    /// Forget the admin id of `room_id`.
    fn clear_admin_id(&self, room_id: &str);
}

/// Generate a fresh client identity.
pub fn new_user_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct IssuedId {
    user_id: String,
    issued_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct IdentityRecords {
    #[serde(default)]
    users: HashMap<String, IssuedId>,
    #[serde(default)]
    admins: HashMap<String, String>,
}

impl IdentityRecords {
    fn user_id(&self, room_id: &str, now_ms: i64, ttl: Duration) -> Option<String> {
        let issued = self.users.get(room_id)?;
        let age = now_ms.saturating_sub(issued.issued_at_ms);
        (age >= 0 && (age as u128) < ttl.as_millis()).then(|| issued.user_id.clone())
    }

    fn prune(&mut self, now_ms: i64, ttl: Duration) {
        self.users.retain(|_, issued| {
            let age = now_ms.saturating_sub(issued.issued_at_ms);
            age >= 0 && (age as u128) < ttl.as_millis()
        });
    }
}

fn lock(records: &Mutex<IdentityRecords>) -> MutexGuard<'_, IdentityRecords> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity store living only as long as the process.
pub struct MemoryIdentityStore {
    records: Mutex<IdentityRecords>,
    ttl: Duration,
    clock: SharedClock,
}

impl MemoryIdentityStore {
    /// Empty store expiring user ids after `ttl`.
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            records: Mutex::new(IdentityRecords::default()),
            ttl,
            clock,
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn user_id(&self, room_id: &str) -> Option<String> {
        lock(&self.records).user_id(room_id, self.clock.now_ms(), self.ttl)
    }

    fn set_user_id(&self, room_id: &str, user_id: &str) {
        lock(&self.records).users.insert(
            room_id.to_string(),
            IssuedId {
                user_id: user_id.to_string(),
                issued_at_ms: self.clock.now_ms(),
            },
        );
    }

    fn admin_id(&self, room_id: &str) -> Option<String> {
        lock(&self.records).admins.get(room_id).cloned()
    }

    fn set_admin_id(&self, room_id: &str, user_id: &str) {
        lock(&self.records)
            .admins
            .insert(room_id.to_string(), user_id.to_string());
    }

    fn clear_admin_id(&self, room_id: &str) {
        lock(&self.records).admins.remove(room_id);
    }
}

/// Identity store persisted as one JSON document on disk.
///
/// The file is read once on open and rewritten after every change.
pub struct FileIdentityStore {
    path: PathBuf,
    records: Mutex<IdentityRecords>,
    ttl: Duration,
    clock: SharedClock,
}

impl FileIdentityStore {
    /// Open (or lazily create) the store at `path`. Unreadable files start empty.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration, clock: SharedClock) -> Self {
        let path = path.into();
        let mut records = read_records(&path);
        records.prune(clock.now_ms(), ttl);
        Self {
            path,
            records: Mutex::new(records),
            ttl,
            clock,
        }
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut IdentityRecords)) {
        let mut records = lock(&self.records);
        change(&mut records);
        write_records(&self.path, &records);
    }
}

fn read_records(path: &Path) -> IdentityRecords {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "identity file is malformed; starting empty");
                IdentityRecords::default()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no identity file yet");
            IdentityRecords::default()
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read identity file; starting empty");
            IdentityRecords::default()
        }
    }
}

fn write_records(path: &Path, records: &IdentityRecords) {
    let contents = match serde_json::to_string_pretty(records) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(error = %err, "failed to encode identities");
            return;
        }
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %err, "failed to create identity directory");
            return;
        }
    }
    if let Err(err) = fs::write(path, contents) {
        warn!(path = %path.display(), error = %err, "failed to persist identities");
    }
}

impl IdentityStore for FileIdentityStore {
    fn user_id(&self, room_id: &str) -> Option<String> {
        lock(&self.records).user_id(room_id, self.clock.now_ms(), self.ttl)
    }

    fn set_user_id(&self, room_id: &str, user_id: &str) {
        let issued = IssuedId {
            user_id: user_id.to_string(),
            issued_at_ms: self.clock.now_ms(),
        };
        self.update(|records| {
            records.users.insert(room_id.to_string(), issued);
        });
    }

    fn admin_id(&self, room_id: &str) -> Option<String> {
        lock(&self.records).admins.get(room_id).cloned()
    }

    fn set_admin_id(&self, room_id: &str, user_id: &str) {
        self.update(|records| {
            records
                .admins
                .insert(room_id.to_string(), user_id.to_string());
        });
    }

    fn clear_admin_id(&self, room_id: &str) {
        self.update(|records| {
            records.admins.remove(room_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{clock::ManualClock, config::DEFAULT_IDENTITY_TTL};

    const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

    #[test]
    fn user_ids_expire_after_ttl_but_admin_ids_do_not() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryIdentityStore::new(DEFAULT_IDENTITY_TTL, clock.clone());
        store.set_user_id("R", "u1");
        store.set_admin_id("R", "u1");

        clock.advance(DAY_MS - 1);
        assert_eq!(store.user_id("R").as_deref(), Some("u1"));

        clock.advance(1);
        assert_eq!(store.user_id("R"), None);
        assert_eq!(store.admin_id("R").as_deref(), Some("u1"));

        store.clear_admin_id("R");
        assert_eq!(store.admin_id("R"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identities.json");
        let clock = Arc::new(ManualClock::new(5_000));

        let store = FileIdentityStore::open(&path, DEFAULT_IDENTITY_TTL, clock.clone());
        store.set_user_id("R", "u1");
        store.set_admin_id("R", "u1");
        drop(store);

        let reopened = FileIdentityStore::open(&path, DEFAULT_IDENTITY_TTL, clock);
        assert_eq!(reopened.user_id("R").as_deref(), Some("u1"));
        assert_eq!(reopened.admin_id("R").as_deref(), Some("u1"));
    }

    #[test]
    fn malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileIdentityStore::open(&path, DEFAULT_IDENTITY_TTL, Arc::new(ManualClock::new(0)));
        assert_eq!(store.user_id("R"), None);

        store.set_user_id("R", "fresh");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("fresh"));
    }
}
