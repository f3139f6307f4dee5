//! Candidate-root search and on-disk layout.
//!
//! Every version of every tool lives at
//! `<root>/<os>/<arch>/<name>/<version>/...`. Read-only roots are
//! searched first, in configured order, then the single writable root;
//! the first root whose entry file stats wins. Read-only roots receive
//! no writes, ever.

use std::path::{Path, PathBuf};

use crate::platform;

#[derive(Debug, Clone)]
pub struct Roots {
    writable: PathBuf,
    read_only: Vec<PathBuf>,
    tmp_exec: Option<PathBuf>,
}

/// Result of a successful entry lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub entry: PathBuf,
    pub folder: PathBuf,
    pub root: PathBuf,
}

impl Roots {
    pub fn new(writable: PathBuf, read_only: Vec<PathBuf>, tmp_exec: Option<PathBuf>) -> Roots {
        Roots {
            writable,
            read_only,
            tmp_exec,
        }
    }

    pub fn writable_root(&self) -> &Path {
        &self.writable
    }

    pub fn read_only_roots(&self) -> &[PathBuf] {
        &self.read_only
    }

    pub fn tmp_exec_root(&self) -> Option<&Path> {
        self.tmp_exec.as_deref()
    }

    /// Read-only roots in configured order, writable root last.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut roots = self.read_only.clone();
        roots.push(self.writable.clone());
        roots
    }

    pub fn tool_folder(&self, root: &Path, name: &str, version: &str) -> PathBuf {
        root.join(platform::os())
            .join(platform::arch())
            .join(name)
            .join(version)
    }

    /// Install/uninstall target under the writable root. Does not stat.
    pub fn writable_folder(&self, name: &str, version: &str) -> PathBuf {
        self.tool_folder(&self.writable, name, version)
    }

    /// Relocation target under the tmp-exec root, when one is set.
    pub fn exec_tool_folder(&self, name: &str, version: &str) -> Option<PathBuf> {
        self.tmp_exec
            .as_ref()
            .map(|root| self.tool_folder(root, name, version))
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.writable
            .join(platform::os())
            .join(platform::arch())
            .join("_groups")
    }

    /// First candidate root where `entry` stats as a file.
    pub fn resolve(&self, name: &str, version: &str, entry: &str) -> Option<Resolved> {
        if entry.trim().is_empty() {
            return None;
        }
        for root in self.candidates() {
            let folder = self.tool_folder(&root, name, version);
            let entry_path = folder.join(entry);
            if entry_path.is_file() {
                return Some(Resolved {
                    entry: entry_path,
                    folder,
                    root,
                });
            }
        }
        None
    }

    pub fn installed(&self, name: &str, version: &str, entry: &str) -> bool {
        self.resolve(name, version, entry).is_some()
    }

    pub fn is_read_only_root(&self, root: &Path) -> bool {
        self.read_only.iter().any(|r| paths_equal(r, root))
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    clean(a) == clean(b)
}

fn clean(path: &Path) -> PathBuf {
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seed_entry(roots: &Roots, root: &Path, name: &str, version: &str, entry: &str) {
        let folder = roots.tool_folder(root, name, version);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join(entry), b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn read_only_root_wins_over_writable() {
        let dir = tempfile::tempdir().unwrap();
        let ro = dir.path().join("ro");
        let rw = dir.path().join("rw");
        let roots = Roots::new(rw.clone(), vec![ro.clone()], None);

        seed_entry(&roots, &rw, "dotnet", "8.0.5", "dotnet");
        seed_entry(&roots, &ro, "dotnet", "8.0.5", "dotnet");

        let resolved = roots.resolve("dotnet", "8.0.5", "dotnet").unwrap();
        assert_eq!(resolved.root, ro);
        assert!(roots.is_read_only_root(&resolved.root));
    }

    #[test]
    fn read_only_roots_keep_configured_order() {
        let dir = tempfile::tempdir().unwrap();
        let ro1 = dir.path().join("ro1");
        let ro2 = dir.path().join("ro2");
        let rw = dir.path().join("rw");
        let roots = Roots::new(rw, vec![ro1.clone(), ro2.clone()], None);

        seed_entry(&roots, &ro1, "node", "20.1.0", "node");
        seed_entry(&roots, &ro2, "node", "20.1.0", "node");

        assert_eq!(roots.resolve("node", "20.1.0", "node").unwrap().root, ro1);
    }

    #[test]
    fn missing_entry_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let roots = Roots::new(dir.path().to_path_buf(), vec![], None);
        assert!(roots.resolve("node", "20.1.0", "node").is_none());
        assert!(!roots.installed("node", "20.1.0", "node"));
        assert!(roots.resolve("node", "20.1.0", "").is_none());
    }

    #[test]
    fn folder_layout_includes_platform() {
        let roots = Roots::new(PathBuf::from("/data/tools"), vec![], None);
        let folder = roots.writable_folder("dotnet", "8.0.5");
        let expected: PathBuf = [
            "/data/tools",
            crate::platform::os(),
            crate::platform::arch(),
            "dotnet",
            "8.0.5",
        ]
        .iter()
        .collect();
        assert_eq!(folder, expected);
    }
}
