//! Per-remote YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.filemirror/
//!   remotes/
//!     <remote_name>.yaml   (one file per remote, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, StoreError};
use crate::types::{check_name, Remote, RemoteName};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.filemirror/remotes/`
pub fn remotes_dir_at(home: &Path) -> PathBuf {
    home.join(".filemirror").join("remotes")
}

/// `<home>/.filemirror/remotes/<name>.yaml`. Pure, no I/O.
pub fn remote_path_at(home: &Path, name: &RemoteName) -> PathBuf {
    remotes_dir_at(home).join(format!("{}.yaml", name.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single remote.
///
/// Returns `StoreError::RemoteNotFound` if absent,
/// `StoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_remote_at(home: &Path, name: &RemoteName) -> Result<Remote, StoreError> {
    check_name(&name.0)?;
    let path = remote_path_at(home, name);
    if !path.exists() {
        return Err(StoreError::RemoteNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_remote_at` convenience wrapper.
pub fn load_remote(name: &RemoteName) -> Result<Remote, StoreError> {
    load_remote_at(&home()?, name)
}

/// All remotes, sorted by name. Skips stray `.tmp` files.
pub fn list_remotes_at(home: &Path) -> Result<Vec<Remote>, StoreError> {
    let dir = remotes_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut remotes = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let remote: Remote =
            serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })?;
        remotes.push(remote);
    }
    Ok(remotes)
}

/// `list_remotes_at` convenience wrapper.
pub fn list_remotes() -> Result<Vec<Remote>, StoreError> {
    list_remotes_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a remote.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_remote_at(home: &Path, remote: &Remote) -> Result<(), StoreError> {
    check_name(&remote.name.0)?;
    let dir = remotes_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = remote_path_at(home, &remote.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", remote.name.0));

    let yaml = serde_yaml::to_string(remote)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_remote_at` convenience wrapper.
pub fn save_remote(remote: &Remote) -> Result<(), StoreError> {
    save_remote_at(&home()?, remote)
}

// ---------------------------------------------------------------------------
// 4. Add / remove
// ---------------------------------------------------------------------------

/// Register a remote, or point an existing one at a new URL.
///
/// Settings other than the URL are preserved for an existing remote.
pub fn add_remote_at(
    home: &Path,
    name: RemoteName,
    url: Option<String>,
) -> Result<Remote, StoreError> {
    let remote = match load_remote_at(home, &name) {
        Ok(mut existing) => {
            existing.url = url;
            existing.updated_at = Utc::now();
            existing
        }
        Err(StoreError::RemoteNotFound { .. }) => Remote::new(name, url),
        Err(e) => return Err(e),
    };
    save_remote_at(home, &remote)?;
    Ok(remote)
}

/// `add_remote_at` convenience wrapper.
pub fn add_remote(name: RemoteName, url: Option<String>) -> Result<Remote, StoreError> {
    add_remote_at(&home()?, name, url)
}

/// Delete a remote definition. Repositories synced from it are untouched.
pub fn remove_remote_at(home: &Path, name: &RemoteName) -> Result<(), StoreError> {
    check_name(&name.0)?;
    let path = remote_path_at(home, name);
    if !path.exists() {
        return Err(StoreError::RemoteNotFound { path });
    }
    std::fs::remove_file(&path).map_err(|e| io_err(&path, e))
}

/// `remove_remote_at` convenience wrapper.
pub fn remove_remote(name: &RemoteName) -> Result<(), StoreError> {
    remove_remote_at(&home()?, name)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn iso() -> RemoteName {
        RemoteName::from("iso")
    }

    #[test]
    fn remote_path_is_correct() {
        let home = make_home();
        let path = remote_path_at(home.path(), &iso());
        assert!(path.ends_with(".filemirror/remotes/iso.yaml"));
    }

    #[test]
    fn add_then_load_roundtrip() {
        let home = make_home();
        let url = Some("http://host/repo/PULP_MANIFEST".to_string());
        let added = add_remote_at(home.path(), iso(), url.clone()).expect("add");
        let loaded = load_remote_at(home.path(), &iso()).expect("load");
        assert_eq!(loaded, added);
        assert_eq!(loaded.url, url);
        assert!(loaded.mirror);
    }

    #[test]
    fn re_adding_keeps_settings_and_updates_url() {
        let home = make_home();
        let mut remote = add_remote_at(home.path(), iso(), Some("http://a/M".into())).expect("add");
        remote.mirror = false;
        remote.batch_size = 7;
        save_remote_at(home.path(), &remote).expect("save");

        let again = add_remote_at(home.path(), iso(), Some("http://b/M".into())).expect("re-add");
        assert_eq!(again.url.as_deref(), Some("http://b/M"));
        assert!(!again.mirror);
        assert_eq!(again.batch_size, 7);
        assert_eq!(again.created_at, remote.created_at);
    }

    #[test]
    fn save_cleans_up_tmp() {
        let home = make_home();
        add_remote_at(home.path(), iso(), None).expect("add");
        let tmp = remote_path_at(home.path(), &iso()).with_file_name("iso.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_remote_returns_not_found() {
        let home = make_home();
        let err = load_remote_at(home.path(), &iso()).unwrap_err();
        assert!(matches!(err, StoreError::RemoteNotFound { .. }));
    }

    #[test]
    fn list_is_sorted_and_empty_without_dir() {
        let home = make_home();
        assert!(list_remotes_at(home.path()).expect("list").is_empty());

        add_remote_at(home.path(), RemoteName::from("zeta"), None).expect("add");
        add_remote_at(home.path(), RemoteName::from("alpha"), None).expect("add");
        let names: Vec<_> = list_remotes_at(home.path())
            .expect("list")
            .into_iter()
            .map(|r| r.name.0)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn remove_deletes_definition() {
        let home = make_home();
        add_remote_at(home.path(), iso(), None).expect("add");
        remove_remote_at(home.path(), &iso()).expect("remove");
        assert!(matches!(
            load_remote_at(home.path(), &iso()),
            Err(StoreError::RemoteNotFound { .. })
        ));
    }

    #[test]
    fn path_like_names_are_rejected() {
        let home = make_home();
        let err = add_remote_at(home.path(), RemoteName::from("../escape"), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }
}
