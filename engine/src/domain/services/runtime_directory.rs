//! Runtime directory layout
//! Where daemons place their management sockets and profile artifacts

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::domain::error::Result;

/// Directory holding one management socket per live daemon.
///
/// Prefers `$XDG_RUNTIME_DIR/apprt`; falls back to a per-uid directory
/// under `/tmp` when the session has no runtime dir.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("apprt"),
        _ => {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/apprt-{uid}"))
        }
    }
}

/// Create the runtime dir if needed, owner-only permissions.
pub fn ensure_runtime_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

/// Management socket path for a daemon, named by its pid.
pub fn socket_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("{pid}.sock"))
}

/// Directory for pprof artifacts written by `pprof stop`.
pub fn profiles_dir(dir: &Path) -> PathBuf {
    dir.join("profiles")
}

/// Enumerate candidate daemon sockets, paired with the pid from the name.
/// Files that do not look like `<pid>.sock` are skipped.
pub fn list_sockets(dir: &Path) -> Vec<(u32, PathBuf)> {
    let mut sockets = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return sockets,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(stem) = name.strip_suffix(".sock") {
            if let Ok(pid) = stem.parse::<u32>() {
                sockets.push((pid, path));
            }
        }
    }
    sockets.sort_by_key(|(pid, _)| *pid);
    sockets
}
