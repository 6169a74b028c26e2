//! Typed plugin manifest schema and its YAML/JSON parsers.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use errs::ErrorKind;
use serde::Deserialize;

/// A map keyed by `<os>.<arch>`, `<os>` or `*`.
pub type PlatformMap = HashMap<String, String>;

/// Declarative plugin manifest.
///
/// Everything is optional: a name defaults to the manifest file stem, a
/// version to `latest`, and a missing command map makes the corresponding
/// stage a no-op.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "dep")]
    pub dependency: Option<Dependency>,
    #[serde(default)]
    pub resource: Option<ResourceSet>,
    #[serde(default)]
    pub pre_load: PlatformMap,
    #[serde(default)]
    pub post_load: PlatformMap,
    #[serde(default)]
    pub pre_run: PlatformMap,
    #[serde(default)]
    pub post_run: PlatformMap,
    #[serde(default)]
    pub enter: Option<Enter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub plugins: Vec<DependentPlugin>,
}

/// Reference to a dependent plugin: an in-tree relative `file`, or a
/// `repo_file` triple naming a manifest inside another repository.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependentPlugin {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub repo_file: Option<RepoFile>,
}

impl DependentPlugin {
    /// The configured name, defaulting to the referenced file's stem.
    pub fn name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        Path::new(self.filepath())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn filepath(&self) -> &str {
        if !self.file.is_empty() {
            return &self.file;
        }
        self.repo_file.as_ref().map(|r| r.file.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoFile {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSet {
    #[serde(default)]
    pub repos: Vec<ResourceRepo>,
    #[serde(default)]
    pub mirrors: Vec<ResourceMirror>,
    #[serde(default)]
    pub archives: Vec<ResourceArchive>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceRepo {
    #[serde(default)]
    pub url: PlatformMap,
    #[serde(default, rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceArchive {
    #[serde(default)]
    pub url: PlatformMap,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub retain_top_folder: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceMirror {
    #[serde(default)]
    pub url: PlatformMap,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Enter {
    #[serde(default)]
    pub command: PlatformMap,
}

impl PluginSchema {
    /// Parses manifest bytes, dispatching on the file extension.
    /// Anything but `yaml`/`yml`/`json` is an unsupported plugin protocol.
    pub fn parse(data: &[u8], path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_slice(data)
                .with_context(|| format!("parse manifest {} failed", path.display())),
            "json" => serde_json::from_slice(data)
                .with_context(|| format!("parse manifest {} failed", path.display())),
            other => Err(errs::new_error(
                ErrorKind::UnsupportedPlugin,
                format!("plugin protocol [{other}] is not supported"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_yaml_manifest() {
        let data = br#"
name: demo
desc: demo plugin
version: 1.2.3
dep:
  plugins:
    - file: dep.yml
    - name: remote
      repo_file:
        url: https://github.com/g/r.git
        ref: v1
        file: cmd/tool.yml
resource:
  mirrors:
    - url:
        "*": http://host/tool
      path: bin
  archives:
    - url:
        linux.amd64: http://host/tool-linux.tgz
        "*": http://host/tool.tgz
      path: tools
      retain_top_folder: true
  repos:
    - url:
        "*": https://github.com/g/assets.git
      ref: main
      path: assets
pre_load:
  "*": echo pre
enter:
  command:
    "*": echo {{.Version}}
"#;
        let schema = PluginSchema::parse(data, Path::new("demo.yaml")).unwrap();
        assert_eq!(schema.name, "demo");
        assert_eq!(schema.version, "1.2.3");
        let dep = schema.dependency.unwrap();
        assert_eq!(dep.plugins.len(), 2);
        assert_eq!(dep.plugins[0].name(), "dep");
        assert_eq!(dep.plugins[1].name(), "remote");
        assert_eq!(dep.plugins[1].repo_file.as_ref().unwrap().reference, "v1");
        let resource = schema.resource.unwrap();
        assert_eq!(resource.mirrors.len(), 1);
        assert!(resource.archives[0].retain_top_folder);
        assert_eq!(resource.repos[0].path, "assets");
        assert_eq!(schema.pre_load.get("*").unwrap(), "echo pre");
        assert_eq!(
            schema.enter.unwrap().command.get("*").unwrap(),
            "echo {{.Version}}"
        );
    }

    #[test]
    fn parses_a_json_manifest() {
        let data = br#"{"name": "demo", "enter": {"command": {"*": "true"}}}"#;
        let schema = PluginSchema::parse(data, Path::new("demo.json")).unwrap();
        assert_eq!(schema.name, "demo");
        assert!(schema.enter.is_some());
    }

    #[test]
    fn everything_is_optional() {
        let schema = PluginSchema::parse(b"{}", Path::new("empty.json")).unwrap();
        assert!(schema.name.is_empty());
        assert!(schema.dependency.is_none());
        assert!(schema.enter.is_none());
    }

    #[test]
    fn unknown_extensions_are_unsupported_plugins() {
        let err = PluginSchema::parse(b"whatever", Path::new("README.md")).unwrap_err();
        assert_eq!(errs::kind_of(&err), Some(ErrorKind::UnsupportedPlugin));
    }

    #[test]
    fn dependent_name_falls_back_to_the_file_stem() {
        let dp = DependentPlugin {
            file: "tools/fmt.yaml".to_string(),
            ..DependentPlugin::default()
        };
        assert_eq!(dp.name(), "fmt");
    }
}
