//! Session identity persistence (spec §4.8): `(session_id, max_sn)`,
//! persisted atomically after each mutation so a reconnect can resume.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GatewayError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub max_sn: i64,
}

impl SessionIdentity {
    pub fn is_present(&self) -> bool {
        !self.session_id.is_empty()
    }

    /// Load the persisted identity. A missing file yields the default
    /// (empty) identity; a malformed file is logged and treated the same
    /// way rather than surfaced as an error, per spec.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return Self::default(),
        };

        match serde_json::from_slice::<(String, i64)>(&bytes) {
            Ok((session_id, max_sn)) => Self { session_id, max_sn },
            Err(e) => {
                warn!("malformed session file at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Persist via whole-file replace: write to `<path>.tmp`, then rename
    /// over `path` (atomic on the same filesystem).
    pub fn save(&self, path: &Path) -> Result<(), GatewayError> {
        let tmp_path = tmp_path_for(path);
        let body = serde_json::to_vec(&(self.session_id.clone(), self.max_sn))
            .expect("session identity tuple always serializes");
        std::fs::write(&tmp_path, &body)?;
        set_mode_0644(&tmp_path)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Clear the persisted identity (on server-initiated reconnect).
    pub fn clear(path: &Path) -> Result<(), GatewayError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

#[cfg(unix)]
fn set_mode_0644(path: &Path) -> Result<(), GatewayError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o644);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0644(_path: &Path) -> Result<(), GatewayError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("wavelink-session-test-{:?}.json", std::thread::current().id()));
        let _ = std::fs::remove_file(&path);

        let identity = SessionIdentity {
            session_id: "abc".to_string(),
            max_sn: 42,
        };
        identity.save(&path).expect("save");

        let loaded = SessionIdentity::load(&path);
        assert_eq!(loaded, identity);

        SessionIdentity::clear(&path).expect("clear");
        let cleared = SessionIdentity::load(&path);
        assert!(!cleared.is_present());
    }

    #[test]
    fn missing_file_is_empty_identity() {
        let path = std::env::temp_dir().join("wavelink-session-does-not-exist.json");
        let _ = std::fs::remove_file(&path);
        let loaded = SessionIdentity::load(&path);
        assert!(!loaded.is_present());
        assert_eq!(loaded.max_sn, 0);
    }

    #[test]
    fn malformed_file_is_empty_identity() {
        let path = std::env::temp_dir().join("wavelink-session-malformed.json");
        std::fs::write(&path, b"not json").expect("write");
        let loaded = SessionIdentity::load(&path);
        assert!(!loaded.is_present());
        let _ = std::fs::remove_file(&path);
    }
}
