//! Dev-override discovery.
//!
//! `DEV_<UPPER_TOOL_NAME>=<path>` env vars point at a local binary
//! that short-circuits the resolver for that tool name. Paths that do
//! not exist are ignored.

use std::collections::HashMap;
use std::path::PathBuf;

const DEV_PREFIX: &str = "DEV_";

pub(crate) fn overrides_from_env() -> HashMap<String, PathBuf> {
    overrides_from_vars(std::env::vars())
}

pub(crate) fn overrides_from_vars(
    vars: impl Iterator<Item = (String, String)>,
) -> HashMap<String, PathBuf> {
    let mut overrides = HashMap::new();
    for (key, value) in vars {
        let Some(raw_name) = key.strip_prefix(DEV_PREFIX) else {
            continue;
        };
        let name = raw_name.to_lowercase();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        let path = PathBuf::from(&value);
        if path.exists() {
            overrides.insert(name, path);
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_up_existing_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("klive");
        std::fs::write(&exe, b"#!/bin/sh\n").unwrap();

        let vars = vec![
            ("DEV_KLIVE".to_string(), exe.to_string_lossy().into_owned()),
            ("DEV_GHOST".to_string(), "/no/such/binary".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
            ("DEV_".to_string(), "y".to_string()),
        ];
        let overrides = overrides_from_vars(vars.into_iter());
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["klive"], exe);
    }
}
