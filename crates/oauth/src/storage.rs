use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    config_dir::default_token_path,
    error::{Error, Result},
    types::LoginInfo,
};

/// File-backed store for the single login record.
///
/// Every call goes to disk. Writes replace the file atomically through a
/// sibling temp file and `rename`, so readers see either the old or the new
/// record and never a mix.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    /// Store at the platform default location.
    #[must_use]
    pub fn new() -> Self {
        Self::with_path(default_token_path())
    }

    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<LoginInfo> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    path: self.path.clone(),
                });
            },
            Err(source) => {
                return Err(Error::Store {
                    path: self.path.clone(),
                    source,
                });
            },
        };
        serde_json::from_slice(&data).map_err(|source| self.record_error(source))
    }

    pub fn write(&self, info: &LoginInfo) -> Result<()> {
        let data = serde_json::to_vec_pretty(info).map_err(|source| self.record_error(source))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|source| self.store_error(source))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token".into());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        if let Err(source) = write_synced(&tmp, &data) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.store_error(source));
        }
        if let Err(source) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.store_error(source));
        }
        #[cfg(unix)]
        std::fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|source| self.store_error(source))?;

        debug!(path = %self.path.display(), tenant_id = %info.tenant_id, "credential written");
        Ok(())
    }

    fn store_error(&self, source: std::io::Error) -> Error {
        Error::Store {
            path: self.path.clone(),
            source,
        }
    }

    fn record_error(&self, source: serde_json::Error) -> Error {
        Error::Record {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::OAuthToken,
        chrono::{TimeZone, Utc},
    };

    fn sample(tenant: &str, access: &str) -> LoginInfo {
        LoginInfo {
            tenant_id: tenant.into(),
            token: OAuthToken {
                access_token: access.into(),
                refresh_token: "refresh".into(),
                token_type: "Bearer".into(),
                expiry: Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_path(dir.path().join("token.json"));
        let err = store.read().unwrap_err();
        assert!(err.is_not_logged_in());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_path(dir.path().join("nested").join("token.json"));
        let info = sample("tenant-a", "access-a");

        store.write(&info).unwrap();
        assert_eq!(store.read().unwrap(), info);
    }

    #[test]
    fn write_replaces_whole_record_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_path(dir.path().join("token.json"));

        store.write(&sample("tenant-a", "access-a")).unwrap();
        store.write(&sample("tenant-b", "access-b")).unwrap();

        let read = store.read().unwrap();
        assert_eq!(read.tenant_id, "tenant-b");
        assert_eq!(read.token.access_token, "access-b");

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("token.json")]);
    }

    #[test]
    fn corrupt_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = TokenStore::with_path(&path).read().unwrap_err();
        match &err {
            Error::Record { path: bad, .. } => assert_eq!(bad, &path),
            other => panic!("expected Record error, got {other:?}"),
        }
        assert!(err.to_string().contains(&path.display().to_string()));
        assert!(!err.requires_login());
    }

    #[test]
    fn record_with_wrong_shape_is_record_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, br#"{"tenantId": "t"}"#).unwrap();

        let err = TokenStore::with_path(&path).read().unwrap_err();
        assert!(matches!(err, Error::Record { .. }));
    }

    #[test]
    fn write_under_a_regular_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = TokenStore::with_path(blocker.join("token.json"));

        let err = store.write(&sample("tenant-a", "access-a")).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(std::fs::read(&blocker).unwrap(), b"");
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::with_path(dir.path().join("token.json"));
        store.write(&sample("tenant-a", "access-a")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
