//! Staged archive extraction.
//!
//! Archives never extract into the live version folder. Everything
//! lands in a sibling staging directory `.tmp_<versionFolder>` first;
//! only a fully extracted tree is promoted with a rename. When the
//! archive wraps everything in a single top-level directory, that
//! wrapper is stripped (one level, no recursion).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::{Error, Result};

pub fn is_supported_archive(name: &str) -> bool {
    name.ends_with(".zip") || name.ends_with(".tar.gz") || name.ends_with(".tar.xz")
}

/// Extracts `archive` and atomically promotes the result to
/// `tool_folder`. The staging directory is removed on every failure
/// path; an existing target is replaced.
pub fn extract_archive(archive: &Path, tool_folder: &Path) -> Result<()> {
    let staging = staging_dir(tool_folder);

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let name = archive.to_string_lossy();
    let result = if name.ends_with(".zip") {
        extract_zip(archive, &staging)
    } else if name.ends_with(".tar.gz") {
        extract_tar_gz(archive, &staging)
    } else if name.ends_with(".tar.xz") {
        extract_tar_xz(archive, &staging)
    } else {
        Err(Error::UnsupportedArchive(archive.to_path_buf()))
    };
    if let Err(e) = result {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    // A single top-level directory is a redundant wrapper; promote its
    // contents instead of the wrapper itself.
    let mut source = staging.clone();
    let mut stripped_wrapper = false;
    if let Some(only) = single_top_level_dir(&staging)? {
        source = only;
        stripped_wrapper = true;
    }

    if tool_folder.exists() {
        if let Err(e) = fs::remove_dir_all(tool_folder) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
    }
    if let Err(e) = fs::rename(&source, tool_folder) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }
    if stripped_wrapper {
        let _ = fs::remove_dir_all(&staging);
    }
    Ok(())
}

pub(crate) fn staging_dir(tool_folder: &Path) -> PathBuf {
    let parent = tool_folder.parent().unwrap_or_else(|| Path::new("."));
    let base = tool_folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".tmp_{base}"))
}

fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    if first.file_type()?.is_dir() {
        Ok(Some(first.path()))
    } else {
        Ok(None)
    }
}

fn extract_zip(src: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(src)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            continue;
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
        }
    }
    Ok(())
}

fn extract_tar_gz(src: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(src)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.unpack(dest)?;
    Ok(())
}

fn extract_tar_xz(src: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(src)?;
    let mut archive = tar::Archive::new(XzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.unpack(dest)?;
    Ok(())
}
