//! Catalog parsing.
//!
//! The catalog is a JSON document of the form
//! `{toolName: {version: VersionEntry}}`. Per-platform values accept
//! three shapes (bare string, string array, nested os/arch map) and
//! collapse into an ordered list for the current platform.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::platform;

/// One catalog entry resolved for the current platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolConfig {
    pub tool_name: String,
    pub version: String,
    /// Ordered mirror list; empty means "no value for this platform".
    pub download_urls: Vec<String>,
    /// Relative path of the entry file inside the version folder.
    pub entry_path: String,
    pub print_info_cmd: Vec<String>,
    pub is_executable: bool,
}

impl ToolConfig {
    pub fn install_key(&self) -> String {
        install_key(&self.tool_name, &self.version)
    }
}

/// Canonical `"<name>@<version>"` identifier.
pub fn install_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Splits an install key on its last `@`.
pub fn split_install_key(key: &str) -> Option<(&str, &str)> {
    let idx = key.rfind('@')?;
    let (name, version) = (&key[..idx], &key[idx + 1..]);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Keyed by `"<name>@<version>"`.
    pub tools: HashMap<String, ToolConfig>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Catalog> {
        let data = fs::read(path)?;
        Self::from_slice(&data, platform::os(), platform::arch())
    }

    pub fn from_slice(data: &[u8], os: &str, arch: &str) -> Result<Catalog> {
        let raw: HashMap<String, HashMap<String, RawVersionEntry>> = serde_json::from_slice(data)?;

        let mut tools = HashMap::new();
        for (tool_name, versions) in raw {
            for (version, entry) in versions {
                let download_urls = entry
                    .download_url
                    .as_ref()
                    .map(|v| v.resolve(os, arch))
                    .unwrap_or_default();
                if download_urls.is_empty() {
                    warn!(
                        tool = %tool_name,
                        version = %version,
                        "no download url for {os}/{arch}, dropping catalog entry"
                    );
                    continue;
                }
                let entry_path = entry
                    .path_to_entry
                    .as_ref()
                    .map(|v| v.resolve(os, arch))
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let config = ToolConfig {
                    tool_name: tool_name.clone(),
                    version: version.clone(),
                    download_urls,
                    entry_path,
                    print_info_cmd: entry.print_info_cmd.clone().unwrap_or_default().0,
                    is_executable: entry.is_executable,
                };
                tools.insert(config.install_key(), config);
            }
        }
        Ok(Catalog { tools })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawVersionEntry {
    #[serde(rename = "downloadUrl")]
    download_url: Option<OsArchValue>,
    #[serde(rename = "pathToEntry")]
    path_to_entry: Option<OsArchValue>,
    #[serde(rename = "printInfoCmd")]
    print_info_cmd: Option<StringOrSeq>,
    #[serde(rename = "isExecutable", default = "default_true")]
    is_executable: bool,
}

fn default_true() -> bool {
    true
}

/// Parser-level sum type for values that may vary by os and arch.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OsArchValue {
    One(String),
    Many(Vec<String>),
    PerOs(HashMap<String, OsLeaf>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OsLeaf {
    One(String),
    Many(Vec<String>),
    PerArch(HashMap<String, ArchLeaf>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArchLeaf {
    One(String),
    Many(Vec<String>),
}

impl OsArchValue {
    /// Collapses into the ordered value list for `os`/`arch`. Unknown
    /// platforms yield an empty list.
    pub fn resolve(&self, os: &str, arch: &str) -> Vec<String> {
        match self {
            OsArchValue::One(v) => vec![v.clone()],
            OsArchValue::Many(vs) => vs.clone(),
            OsArchValue::PerOs(map) => match map.get(os) {
                Some(OsLeaf::One(v)) => vec![v.clone()],
                Some(OsLeaf::Many(vs)) => vs.clone(),
                Some(OsLeaf::PerArch(archs)) => match archs.get(arch) {
                    Some(ArchLeaf::One(v)) => vec![v.clone()],
                    Some(ArchLeaf::Many(vs)) => vs.clone(),
                    None => Vec::new(),
                },
                None => Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum RawStringOrSeq {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct StringOrSeq(Vec<String>);

impl<'de> Deserialize<'de> for StringOrSeq {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match RawStringOrSeq::deserialize(deserializer)? {
            RawStringOrSeq::None => StringOrSeq(Vec::new()),
            RawStringOrSeq::One(s) => StringOrSeq(vec![s]),
            RawStringOrSeq::Many(vs) => StringOrSeq(vs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_applies_everywhere() {
        let raw = br#"{"dotnet": {"8.0.5": {
            "downloadUrl": "https://example.com/dotnet.zip",
            "pathToEntry": "dotnet"
        }}}"#;
        let catalog = Catalog::from_slice(raw, "linux", "x86_64").unwrap();
        let cfg = &catalog.tools["dotnet@8.0.5"];
        assert_eq!(cfg.download_urls, vec!["https://example.com/dotnet.zip"]);
        assert_eq!(cfg.entry_path, "dotnet");
        assert!(cfg.is_executable);
    }

    #[test]
    fn array_keeps_mirror_order() {
        let raw = br#"{"ffmpeg": {"6.0": {
            "downloadUrl": ["https://a.example/f.tar.gz", "https://b.example/f.tar.gz"],
            "pathToEntry": "bin/ffmpeg"
        }}}"#;
        let catalog = Catalog::from_slice(raw, "linux", "x86_64").unwrap();
        let cfg = &catalog.tools["ffmpeg@6.0"];
        assert_eq!(
            cfg.download_urls,
            vec!["https://a.example/f.tar.gz", "https://b.example/f.tar.gz"]
        );
    }

    #[test]
    fn nested_map_selects_current_platform() {
        let raw = br#"{"node": {"20.1.0": {
            "downloadUrl": {
                "linux": {"x86_64": "https://example.com/node-linux-x64.tar.xz",
                          "aarch64": ["https://example.com/node-linux-arm64.tar.xz"]},
                "windows": "https://example.com/node-win.zip"
            },
            "pathToEntry": {"linux": "bin/node", "windows": "node.exe"}
        }}}"#;
        let catalog = Catalog::from_slice(raw, "linux", "x86_64").unwrap();
        let cfg = &catalog.tools["node@20.1.0"];
        assert_eq!(
            cfg.download_urls,
            vec!["https://example.com/node-linux-x64.tar.xz"]
        );
        assert_eq!(cfg.entry_path, "bin/node");

        let catalog = Catalog::from_slice(raw, "windows", "x86_64").unwrap();
        let cfg = &catalog.tools["node@20.1.0"];
        assert_eq!(cfg.entry_path, "node.exe");
    }

    #[test]
    fn unknown_platform_drops_entry() {
        let raw = br#"{"node": {"20.1.0": {
            "downloadUrl": {"windows": "https://example.com/node-win.zip"},
            "pathToEntry": "node.exe"
        }}}"#;
        let catalog = Catalog::from_slice(raw, "linux", "x86_64").unwrap();
        assert!(catalog.tools.is_empty());
    }

    #[test]
    fn print_info_cmd_accepts_string_and_array() {
        let raw = br#"{"dotnet": {"8.0.5": {
            "downloadUrl": "https://example.com/d.zip",
            "pathToEntry": "dotnet",
            "printInfoCmd": "--version"
        }, "8.0.4": {
            "downloadUrl": "https://example.com/d4.zip",
            "pathToEntry": "dotnet",
            "printInfoCmd": ["--info", "--verbose"],
            "isExecutable": false
        }}}"#;
        let catalog = Catalog::from_slice(raw, "linux", "x86_64").unwrap();
        assert_eq!(
            catalog.tools["dotnet@8.0.5"].print_info_cmd,
            vec!["--version"]
        );
        let old = &catalog.tools["dotnet@8.0.4"];
        assert_eq!(old.print_info_cmd, vec!["--info", "--verbose"]);
        assert!(!old.is_executable);
    }

    #[test]
    fn install_key_round_trip() {
        assert_eq!(split_install_key("dotnet@8.0.5"), Some(("dotnet", "8.0.5")));
        assert_eq!(split_install_key("scoped@tool@1.0"), Some(("scoped@tool", "1.0")));
        assert_eq!(split_install_key("noversion"), None);
        assert_eq!(split_install_key("@1.0"), None);
    }
}
