//! Credential Store: the single API key that enables the remote backend.
//!
//! The key lives in a `.env`-style file as one `GEMINI_API_KEY='<value>'`
//! entry. Single quotes keep dotenv from expanding `$` or cutting at `#`. It is loaded once when the store is opened and only changes through
//! an explicit [`CredentialStore::save`].
//!
//! The store never reaches into adapters. Callers read [`CredentialStore::current`]
//! and hand the value to [`crate::backend::BackendRegistry`] when they build an
//! adapter, so a saved key takes effect on the next adapter that is built and
//! an invalid key only surfaces when it is used.

use crate::error::Pdf2MdError;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Name of the single entry kept in the credential file.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// An external-service API key. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, rejecting empty, multi-line or single-quoted values.
    pub fn new(value: impl Into<String>) -> Result<Self, Pdf2MdError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "API key must not be empty".to_string(),
            ));
        }
        if value.contains(['\n', '\r']) {
            return Err(Pdf2MdError::InvalidConfig(
                "API key must be a single line".to_string(),
            ));
        }
        if value.contains('\'') {
            return Err(Pdf2MdError::InvalidConfig(
                "API key must not contain a single quote".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The raw key, for request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if self.0.chars().count() > 8 {
            format!("****{tail}")
        } else {
            "****".to_string()
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Process-wide holder of at most one active credential.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Option<ApiKey>>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store backed by `path` and load the current key.
    ///
    /// A non-empty `GEMINI_API_KEY` in the process environment takes
    /// precedence over the file, matching dotenv semantics. A missing file is
    /// not an error; the remote backend is simply disabled.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Pdf2MdError> {
        Self::open_with_env(path, std::env::var(API_KEY_VAR).ok())
    }

    /// [`CredentialStore::open`] with the environment value supplied by the caller.
    pub fn open_with_env(
        path: impl Into<PathBuf>,
        env_value: Option<String>,
    ) -> Result<Self, Pdf2MdError> {
        let path = path.into();
        let from_env = env_value.and_then(|v| ApiKey::new(v).ok());
        let key = match from_env {
            Some(key) => {
                debug!("credential taken from ${API_KEY_VAR}");
                Some(key)
            }
            None => load(&path)?,
        };
        Ok(Self {
            path,
            current: RwLock::new(key),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active key, if any.
    pub fn current(&self) -> Option<ApiKey> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    /// Replace the credential file with exactly one entry and make `value`
    /// the active key.
    ///
    /// Concurrent saves are serialised and the file is replaced atomically,
    /// so readers see either the old file or the new one. The key is not
    /// validated against the service.
    pub fn save(&self, value: &str) -> Result<ApiKey, Pdf2MdError> {
        let key = ApiKey::new(value)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        write_entry(&self.path, &key).map_err(|source| Pdf2MdError::Credential {
            path: self.path.clone(),
            source,
        })?;

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(key.clone());
        info!("credential saved to {}", self.path.display());
        Ok(key)
    }
}

/// Read the key entry from a `.env`-style file. Other entries are ignored.
fn load(path: &Path) -> Result<Option<ApiKey>, Pdf2MdError> {
    let credential_err = |source: io::Error| Pdf2MdError::Credential {
        path: path.to_path_buf(),
        source,
    };

    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no credential file at {}", path.display());
            return Ok(None);
        }
        Err(dotenvy::Error::Io(e)) => return Err(credential_err(e)),
        Err(e) => return Ok(unreadable(path, &e)),
    };

    let mut found = None;
    for entry in entries {
        let (name, value) = match entry {
            Ok(entry) => entry,
            Err(e) => return Ok(unreadable(path, &e)),
        };
        if name == API_KEY_VAR {
            found = ApiKey::new(value).ok();
        }
    }
    Ok(found)
}

// A malformed file only disables the remote backend.
fn unreadable(path: &Path, error: &dotenvy::Error) -> Option<ApiKey> {
    warn!(
        "ignoring unreadable credential file {}: {error}",
        path.display()
    );
    None
}

fn write_entry(path: &Path, key: &ApiKey) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    writeln!(tmp, "{API_KEY_VAR}='{}'", key.expose())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn missing_file_means_no_credential() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::open_with_env(dir.path().join(".env"), None).unwrap();
        assert!(!store.is_configured());
        assert!(store.current().is_none());
    }

    #[test]
    fn loads_key_among_other_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# local settings\nOTHER=1\nGEMINI_API_KEY=\"abc123\"\n").unwrap();

        let store = CredentialStore::open_with_env(&path, None).unwrap();
        assert_eq!(store.current().unwrap().expose(), "abc123");
    }

    #[test]
    fn environment_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "GEMINI_API_KEY=from-file\n").unwrap();

        let store = CredentialStore::open_with_env(&path, Some("from-env".into())).unwrap();
        assert_eq!(store.current().unwrap().expose(), "from-env");

        let blank_env = CredentialStore::open_with_env(&path, Some("  ".into())).unwrap();
        assert_eq!(blank_env.current().unwrap().expose(), "from-file");
    }

    #[test]
    fn empty_entry_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "GEMINI_API_KEY=\n").unwrap();
        let store = CredentialStore::open_with_env(&path, None).unwrap();
        assert!(!store.is_configured());
    }

    #[test]
    fn save_rewrites_file_with_single_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "OTHER=1\nGEMINI_API_KEY=old\n").unwrap();

        let store = CredentialStore::open_with_env(&path, None).unwrap();
        store.save("  new-key-0001  ").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "GEMINI_API_KEY='new-key-0001'\n"
        );
        assert_eq!(store.current().unwrap().expose(), "new-key-0001");

        let reopened = CredentialStore::open_with_env(&path, None).unwrap();
        assert_eq!(reopened.current(), store.current());
    }

    #[test]
    fn save_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join(".env");
        let store = CredentialStore::open_with_env(&path, None).unwrap();
        store.save("k").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_rejects_empty_and_multiline_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let store = CredentialStore::open_with_env(&path, None).unwrap();

        assert!(matches!(store.save("   "), Err(Pdf2MdError::InvalidConfig(_))));
        assert!(matches!(
            store.save("a\nGEMINI_API_KEY=b"),
            Err(Pdf2MdError::InvalidConfig(_))
        ));
        assert!(!path.exists());
        assert!(!store.is_configured());
    }

    #[test]
    fn concurrent_saves_leave_one_complete_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let store = Arc::new(CredentialStore::open_with_env(&path, None).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.save(&format!("key-{i:04}")).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let value = content
            .trim()
            .strip_prefix("GEMINI_API_KEY='")
            .and_then(|v| v.strip_suffix('\''))
            .unwrap();
        assert!(value.starts_with("key-"));
        assert_eq!(store.current().unwrap().expose(), value);
    }

    #[test]
    fn saved_keys_read_back_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let store = CredentialStore::open_with_env(&path, None).unwrap();

        for raw in ["abc$HOME", "ab#c d", "x\"y", "back\\slash", "${GEMINI_API_KEY}"] {
            store.save(raw).unwrap();
            let reopened = CredentialStore::open_with_env(&path, None).unwrap();
            assert_eq!(reopened.current().unwrap().expose(), raw);
        }
    }

    #[test]
    fn single_quote_is_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let store = CredentialStore::open_with_env(&path, None).unwrap();

        assert!(matches!(store.save("x'y"), Err(Pdf2MdError::InvalidConfig(_))));
        assert!(!path.exists());
    }

    #[test]
    fn malformed_file_disables_credential_without_failing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "GEMINI_API_KEY='unterminated\n").unwrap();

        let store = CredentialStore::open_with_env(&path, None).unwrap();
        assert!(!store.is_configured());

        store.save("fresh-key").unwrap();
        let reopened = CredentialStore::open_with_env(&path, None).unwrap();
        assert_eq!(reopened.current().unwrap().expose(), "fresh-key");
    }

    #[test]
    fn key_is_redacted_in_output() {
        let key = ApiKey::new("AIzaSyVerySecretValue1234").unwrap();
        assert_eq!(key.to_string(), "****1234");
        assert!(!format!("{key:?}").contains("Secret"));
        assert_eq!(ApiKey::new("short").unwrap().to_string(), "****");
    }
}
