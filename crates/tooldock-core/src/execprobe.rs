//! Exec-permission probing for `noexec` mount points.
//!
//! A directory supports execution iff a freshly written `0755` script
//! actually runs there. Results are cached with a TTL because the
//! probe costs a disk write plus a process spawn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default)]
pub struct ExecProbe {
    cache: Mutex<HashMap<PathBuf, (bool, Instant)>>,
}

impl ExecProbe {
    pub fn new() -> ExecProbe {
        ExecProbe::default()
    }

    /// Cached probe keyed by the cleaned directory path.
    pub fn supported(&self, dir: &Path) -> bool {
        if dir.as_os_str().is_empty() {
            return false;
        }
        let key: PathBuf = dir.components().collect();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((ok, checked_at)) = cache.get(&key) {
                if checked_at.elapsed() < CACHE_TTL {
                    return *ok;
                }
            }
        }
        let ok = Self::probe(&key);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, (ok, Instant::now()));
        ok
    }

    /// Uncached probe. Write failures and exec failures both mean
    /// "unsupported"; the probe file is removed on every exit path.
    #[cfg(unix)]
    pub fn probe(dir: &Path) -> bool {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::process::Command;

        if dir.as_os_str().is_empty() {
            return false;
        }
        if fs::create_dir_all(dir).is_err() {
            return false;
        }
        let test_file = dir.join(".exec_probe.sh");
        if fs::write(&test_file, b"#!/bin/sh\necho ok\n").is_err() {
            return false;
        }
        let _guard = RemoveOnDrop(&test_file);
        if fs::set_permissions(&test_file, fs::Permissions::from_mode(0o755)).is_err() {
            return false;
        }
        match Command::new(&test_file).output() {
            Ok(output) => {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("ok")
            }
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    pub fn probe(_dir: &Path) -> bool {
        true
    }
}

#[cfg(unix)]
struct RemoveOnDrop<'a>(&'a Path);

#[cfg(unix)]
impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_unsupported() {
        let probe = ExecProbe::new();
        assert!(!probe.supported(Path::new("")));
    }

    #[cfg(unix)]
    #[test]
    fn tmpdir_supports_exec_and_probe_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ExecProbe::new();
        // A plain tmpdir is normally exec-capable; if this host mounts
        // it noexec the probe must still clean up after itself.
        let _ = probe.supported(dir.path());
        assert!(!dir.path().join(".exec_probe.sh").exists());
    }

    #[cfg(unix)]
    #[test]
    fn cached_result_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ExecProbe::new();
        let first = probe.supported(dir.path());
        let second = probe.supported(dir.path());
        assert_eq!(first, second);
    }
}
