//! File-backed metadata and key storage.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use pigeon_core::{HostError, KeyStore, MetadataStore, PairingSession};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    session: Option<PairingSession>,
    last_cursor: Option<String>,
}

/// Metadata store kept in one bincode file. Every write replaces the file atomically and
/// is fsynced before returning.
pub struct FileStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl FileStore {
    /// Open the store, starting empty if the file doesn't exist yet.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, snapshot })
    }

    fn commit(&mut self, next: Snapshot) -> Result<(), HostError> {
        write_durable(&self.path, &next).map_err(|e| {
            HostError::Storage(format!("{}: {e}", self.path.display()))
        })?;
        self.snapshot = next;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}

fn write_durable(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let bytes = bincode::serialize(snapshot)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl MetadataStore for FileStore {
    fn get_pairing_session(&self, public_key: &[u8]) -> Result<Option<PairingSession>, HostError> {
        Ok(self
            .snapshot
            .session
            .as_ref()
            .filter(|s| s.matches_key(public_key))
            .cloned())
    }

    fn put_pairing_session(&mut self, session: &PairingSession) -> Result<(), HostError> {
        let next = Snapshot {
            session: Some(session.clone()),
            ..self.snapshot.clone()
        };
        self.commit(next)
    }

    fn remove_pairing_session(&mut self, public_key: &[u8]) -> Result<(), HostError> {
        if self.get_pairing_session(public_key)?.is_none() {
            return Ok(());
        }
        let next = Snapshot {
            session: None,
            ..self.snapshot.clone()
        };
        self.commit(next)
    }

    fn get_last_cursor(&self) -> Result<Option<String>, HostError> {
        Ok(self.snapshot.last_cursor.clone())
    }

    fn put_last_cursor(&mut self, cursor: &str) -> Result<(), HostError> {
        let next = Snapshot {
            last_cursor: Some(cursor.to_string()),
            ..self.snapshot.clone()
        };
        self.commit(next)
    }
}

/// Auth key read from a file holding its hex encoding. Read on every use; never cached.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyStore for FileKeyStore {
    fn auth_key(&self) -> Result<Vec<u8>, HostError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| HostError::KeyStore(format!("{}: {e}", self.path.display())))?;
        let key = hex::decode(text.trim())
            .map_err(|_| HostError::KeyStore(format!("{}: not hex", self.path.display())))?;
        if key.is_empty() {
            return Err(HostError::KeyStore(format!("{}: empty", self.path.display())));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "02a1633cafcc01ebfb6d78e39f687a1f0995c62fc95f51ead10a02ee0be551b5dc";

    fn session(id: &str) -> PairingSession {
        PairingSession::new(id, "PWB", KEY_HEX, Some("https://shop.example/done"))
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/state.bin");
        let key = hex::decode(KEY_HEX).unwrap();

        let mut store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_last_cursor().unwrap(), None);
        store.put_pairing_session(&session("shop-1")).unwrap();
        store.put_last_cursor("41").unwrap();
        store.put_last_cursor("42").unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_last_cursor().unwrap().as_deref(), Some("42"));
        assert_eq!(
            reopened.get_pairing_session(&key).unwrap(),
            Some(session("shop-1"))
        );
        assert_eq!(reopened.get_pairing_session(&[2u8; 33]).unwrap(), None);
    }

    #[test]
    fn remove_only_matching_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let key = hex::decode(KEY_HEX).unwrap();
        let mut store = FileStore::open(&path).unwrap();
        store.put_pairing_session(&session("shop-1")).unwrap();

        store.remove_pairing_session(&[2u8; 33]).unwrap();
        assert!(store.get_pairing_session(&key).unwrap().is_some());
        store.remove_pairing_session(&key).unwrap();
        assert!(FileStore::open(&path)
            .unwrap()
            .get_pairing_session(&key)
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        fs::write(&path, [0xff; 3]).unwrap();
        assert!(FileStore::open(&path).is_err());
    }

    #[test]
    fn key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.key");
        let keys = FileKeyStore::new(&path);
        assert!(matches!(keys.auth_key(), Err(HostError::KeyStore(_))));

        fs::write(&path, "0707070707070707070707070707070707070707070707070707070707070707\n").unwrap();
        assert_eq!(keys.auth_key().unwrap(), vec![7u8; 32]);

        fs::write(&path, "not hex").unwrap();
        assert!(keys.auth_key().is_err());
    }
}
