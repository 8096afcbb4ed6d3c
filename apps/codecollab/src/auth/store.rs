use super::error::AuthError;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredToken {
    pub fn new(token: impl Into<String>, username: Option<String>) -> Self {
        Self {
            token: token.into(),
            username,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Durable home of the auth token. Nothing else is persisted client side.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredToken>, AuthError>;
    fn save(&self, token: &StoredToken) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// TOML file, `~/.codecollab/credentials` unless pointed elsewhere.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Result<Self, AuthError> {
        let base = BaseDirs::new()
            .ok_or_else(|| AuthError::Config("unable to determine home directory".into()))?;
        Ok(Self::at(base.home_dir().join(".codecollab").join("credentials")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredToken>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let stored: StoredToken = toml::from_str(&raw)?;
        Ok(Some(stored))
    }

    fn save(&self, token: &StoredToken) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let serialized = toml::to_string_pretty(token)?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(serialized.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = file.metadata()?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(StoredToken::new(token, None))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredToken>, AuthError> {
        Ok(self.slot.lock().map(|slot| slot.clone()).unwrap_or(None))
    }

    fn save(&self, token: &StoredToken) -> Result<(), AuthError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("codecollab-{}", uuid::Uuid::new_v4()))
            .join("credentials")
    }

    #[test_timeout::timeout]
    fn file_store_round_trips_and_clears() {
        let store = FileTokenStore::at(scratch_path());
        assert!(store.load().unwrap().is_none());

        let token = StoredToken::new("abc", Some("ada".into()));
        store.save(&token).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "abc");
        assert_eq!(loaded.username.as_deref(), Some("ada"));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();

        if let Some(dir) = store.path().parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[cfg(unix)]
    #[test_timeout::timeout]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let store = FileTokenStore::at(scratch_path());
        store.save(&StoredToken::new("abc", None)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        if let Some(dir) = store.path().parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test_timeout::timeout]
    fn memory_store_holds_one_token() {
        let store = MemoryTokenStore::with_token("first");
        assert_eq!(store.load().unwrap().unwrap().token, "first");
        store.save(&StoredToken::new("second", None)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "second");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
