//! Trash sweep and orphan-version pruning under the writable root.
//! Read-only roots are never touched.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use tracing::warn;
use walkdir::WalkDir;

use crate::locks::FolderLocks;
use crate::platform;
use crate::roots::Roots;

/// Removes leftover `.trash-*` directories from interrupted uninstalls.
/// Runs at startup, best-effort.
pub(crate) fn sweep_trash(roots: &Roots) {
    let root = roots.writable_root();
    if !root.exists() {
        return;
    }
    let mut targets = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().starts_with(".trash-")
        {
            targets.push(entry.path().to_path_buf());
        }
    }
    for path in targets {
        if let Err(e) = fs::remove_dir_all(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "failed to remove trash folder: {e}");
            }
        }
    }
}

/// Prunes the writable root, keeping only version folders whose
/// `name@version` key is in `allowed`. Subtrees for foreign os/arch are
/// removed wholesale; `.tmp_*` and `.trash-*` entries are skipped, as
/// is any version whose folder lock is currently held. Empty
/// intermediate directories are removed afterwards. Returns the deleted
/// paths.
pub(crate) fn prune_versions(
    roots: &Roots,
    locks: &FolderLocks,
    allowed: &HashSet<String>,
) -> Vec<PathBuf> {
    let mut deleted = Vec::new();
    let root = roots.writable_root();
    let os_dirs = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return deleted,
    };

    for os_entry in os_dirs.flatten() {
        if !os_entry.path().is_dir() {
            continue;
        }
        let os_name = os_entry.file_name().to_string_lossy().into_owned();
        let os_path = os_entry.path();
        if os_name != platform::os() {
            remove_tree(&os_path, &mut deleted);
            continue;
        }

        let arch_dirs = match fs::read_dir(&os_path) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for arch_entry in arch_dirs.flatten() {
            if !arch_entry.path().is_dir() {
                continue;
            }
            let arch_name = arch_entry.file_name().to_string_lossy().into_owned();
            let arch_path = arch_entry.path();
            if arch_name != platform::arch() {
                remove_tree(&arch_path, &mut deleted);
                continue;
            }

            let tool_dirs = match fs::read_dir(&arch_path) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for tool_entry in tool_dirs.flatten() {
                if !tool_entry.path().is_dir() {
                    continue;
                }
                let tool_name = tool_entry.file_name().to_string_lossy().into_owned();
                if tool_name == "_groups" {
                    continue;
                }
                let tool_path = tool_entry.path();

                let version_dirs = match fs::read_dir(&tool_path) {
                    Ok(entries) => entries,
                    Err(_) => continue,
                };
                for version_entry in version_dirs.flatten() {
                    if !version_entry.path().is_dir() {
                        continue;
                    }
                    let version = version_entry.file_name().to_string_lossy().into_owned();
                    if version.starts_with(".tmp_") || version.starts_with(".trash-") {
                        continue;
                    }
                    let key = crate::config::install_key(&tool_name, &version);
                    if allowed.contains(&key) {
                        continue;
                    }
                    let version_path = version_entry.path();
                    // Busy folders are skipped, not waited on.
                    let Some(_guard) = locks.try_lock(&version_path) else {
                        continue;
                    };
                    remove_tree(&version_path, &mut deleted);
                }

                remove_if_empty(&tool_path);
            }
            remove_if_empty(&arch_path);
        }
        remove_if_empty(&os_path);
    }

    deleted
}

fn remove_tree(path: &std::path::Path, deleted: &mut Vec<PathBuf>) {
    match fs::remove_dir_all(path) {
        Ok(()) => deleted.push(path.to_path_buf()),
        Err(e) => warn!(path = %path.display(), "failed to remove: {e}"),
    }
}

fn remove_if_empty(path: &std::path::Path) {
    if let Ok(mut entries) = fs::read_dir(path) {
        if entries.next().is_none() {
            let _ = fs::remove_dir(path);
        }
    }
}
