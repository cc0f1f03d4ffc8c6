//! The set of chats that receive up/down broadcasts, mirrored to a TOML file.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tempfile::NamedTempFile;

use crate::error::Error;

/// Opaque chat identifier: a numeric chat id or an `@channel` name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubscriberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for SubscriberId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubscriberFile {
    subscribers: BTreeSet<SubscriberId>,
}

pub struct SubscriptionStore {
    path: PathBuf,
    members: Mutex<BTreeSet<SubscriberId>>,
    /// Serialises file writes; `members` is never held across one.
    writer: Mutex<()>,
}

impl SubscriptionStore {
    /// Reads the persisted set. When no file exists yet the store starts with
    /// `default` (the main channel) as its only member.
    pub fn load<P: AsRef<Path>>(path: P, default: Option<SubscriberId>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let members = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<SubscriberFile>(&content)?.subscribers
        } else {
            info!("No subscriber file at {}, starting fresh", path.display());
            default.into_iter().collect()
        };
        info!("Loaded {} subscribers", members.len());

        Ok(Self {
            path,
            members: Mutex::new(members),
            writer: Mutex::new(()),
        })
    }

    /// Adds `id`. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, id: SubscriberId) -> bool {
        let added = self.lock().insert(id);
        self.persist();
        added
    }

    /// Removes `id`. Returns `false` if it was never subscribed, in which case
    /// nothing is written.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.lock().remove(id);
        if removed {
            self.persist();
        }
        removed
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.lock().contains(id)
    }

    pub fn snapshot(&self) -> Vec<SubscriberId> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<SubscriberId>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Best effort: the in-memory set stays authoritative if the write fails.
    /// Each write takes the latest set under the writer lock, so the last
    /// write to finish always mirrors memory.
    fn persist(&self) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let members = self.lock().clone();
        if let Err(e) = write_atomic(&self.path, members) {
            error!(
                "Failed to persist subscribers to {}: {e}",
                self.path.display()
            );
        }
    }
}

fn write_atomic(path: &Path, subscribers: BTreeSet<SubscriberId>) -> Result<(), Error> {
    let content = toml::to_string(&SubscriberFile { subscribers })?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SubscriptionStore {
        SubscriptionStore::load(
            dir.path().join("subscribers.toml"),
            Some(SubscriberId::from("@dotmonitor")),
        )
        .expect("Failed to load store")
    }

    fn persisted(dir: &TempDir) -> BTreeSet<SubscriberId> {
        let content = fs::read_to_string(dir.path().join("subscribers.toml")).unwrap();
        toml::from_str::<SubscriberFile>(&content)
            .unwrap()
            .subscribers
    }

    #[test]
    fn test_fresh_store_contains_main_channel() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.snapshot(), vec![SubscriberId::from("@dotmonitor")]);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.subscribe(SubscriberId::from(42)));
        assert!(!store.subscribe(SubscriberId::from(42)));
        assert_eq!(store.len(), 2);
        assert_eq!(persisted(&dir).len(), 2);
    }

    #[test]
    fn test_unsubscribe_non_member_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.subscribe(SubscriberId::from(7));

        assert!(!store.unsubscribe(&SubscriberId::from(8)));
        assert_eq!(persisted(&dir).len(), 2);

        assert!(store.unsubscribe(&SubscriberId::from(7)));
        assert!(!store.contains(&SubscriberId::from(7)));
        assert_eq!(persisted(&dir).len(), 1);
    }

    #[test]
    fn test_reload_reproduces_member_set() {
        let dir = TempDir::new().unwrap();
        let before = {
            let store = store_in(&dir);
            store.subscribe(SubscriberId::from(1));
            store.subscribe(SubscriberId::from(-100_200));
            store.unsubscribe(&SubscriberId::from("@dotmonitor"));
            store.snapshot()
        };

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.snapshot(), before);
        assert!(!reloaded.contains(&SubscriberId::from("@dotmonitor")));
    }

    #[test]
    fn test_failed_write_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("subscribers.toml");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("blocker"), b"x").unwrap();

        let store = SubscriptionStore {
            path,
            members: Mutex::new(BTreeSet::new()),
            writer: Mutex::new(()),
        };
        assert!(store.subscribe(SubscriberId::from(5)));
        assert!(store.contains(&SubscriberId::from(5)));
    }

    #[test]
    fn test_snapshot_does_not_wait_for_writes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let _writing = store.writer.lock().unwrap();
        assert_eq!(store.snapshot(), vec![SubscriberId::from("@dotmonitor")]);
        assert!(store.contains(&SubscriberId::from("@dotmonitor")));
    }

    #[test]
    fn test_concurrent_mutations_converge_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        std::thread::scope(|scope| {
            for worker in 0..4_i64 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..10 {
                        store.subscribe(SubscriberId::from(worker * 100 + i));
                    }
                    store.unsubscribe(&SubscriberId::from(worker * 100));
                });
            }
        });

        assert_eq!(store.len(), 37);
        assert_eq!(
            persisted(&dir),
            store.snapshot().into_iter().collect::<BTreeSet<_>>()
        );
    }
}
