//! Sync plugins.
//!
//! A plugin is an opaque unit of work identified by name: it is run for one
//! trade date and reports a structured result. The worker resolves plugins
//! through a [`PluginRegistry`]; [`CommandPlugin`] adapts an external
//! executable to the [`SyncPlugin`] trait.
//!
//! # Result Shape
//!
//! ```json
//! {
//!   "status": "success",
//!   "steps": { "extract": {...}, "load": { "total_records": 120 } },
//!   "error": null,
//!   "error_detail": null
//! }
//! ```

pub mod command;

pub use command::CommandPlugin;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PluginError;

/// Status value a plugin reports when it ran cleanly.
pub const STATUS_SUCCESS: &str = "success";

/// Name of the step whose record count a task reports.
pub const LOAD_STEP: &str = "load";

/// Per-step summary inside a plugin result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,

    /// Any other step metrics, kept for logging.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StepSummary {
    pub fn with_records(total_records: u64) -> Self {
        Self {
            total_records: Some(total_records),
            extra: HashMap::new(),
        }
    }
}

/// What a plugin run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRunResult {
    pub status: String,
    #[serde(default)]
    pub steps: HashMap<String, StepSummary>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl PluginRunResult {
    /// A successful result that loaded `records` rows.
    pub fn success(records: u64) -> Self {
        let mut steps = HashMap::new();
        steps.insert(LOAD_STEP.to_string(), StepSummary::with_records(records));
        Self {
            status: STATUS_SUCCESS.to_string(),
            steps,
            error: None,
            error_detail: None,
        }
    }

    /// A failed result carrying the plugin's own diagnostic.
    pub fn failure(error: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            status: "failed".to_string(),
            steps: HashMap::new(),
            error: Some(error.into()),
            error_detail: detail,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Records reported by the `load` step, if present.
    pub fn load_records(&self) -> Option<u64> {
        self.steps.get(LOAD_STEP).and_then(|step| step.total_records)
    }
}

/// A named data-sync connector.
#[async_trait]
pub trait SyncPlugin: Send + Sync {
    /// Registry name of the plugin.
    fn name(&self) -> &str;

    /// Syncs data for one trade date.
    async fn run(&self, trade_date: NaiveDate) -> Result<PluginRunResult, PluginError>;
}

/// Plugins by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn SyncPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under its own name.
    ///
    /// # Errors
    /// Returns `DuplicatePlugin` if the name is already taken.
    pub fn register(&mut self, plugin: Arc<dyn SyncPlugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::DuplicatePlugin(name));
        }
        debug!(plugin = %name, "Registered plugin");
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Builds a registry with one [`CommandPlugin`] per executable in `dir`.
    ///
    /// The plugin name is the file stem, so `tushare_daily.py` registers as
    /// `tushare_daily`. Hidden files and subdirectories are skipped. A missing
    /// directory yields an empty registry.
    pub fn discover(dir: &Path) -> Result<Self, PluginError> {
        let mut registry = Self::new();

        if !dir.exists() {
            info!(dir = %dir.display(), "Plugin directory does not exist, no plugins loaded");
            return Ok(registry);
        }

        let discovery_error = |source| PluginError::Discovery {
            dir: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(discovery_error)? {
            let path = entry.map_err(discovery_error)?.path();
            if is_plugin_executable(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            registry.register(Arc::new(CommandPlugin::new(name, path.clone())))?;
        }

        info!(dir = %dir.display(), count = registry.len(), "Discovered plugins");
        Ok(registry)
    }
}

fn is_plugin_executable(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    if hidden || !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedPlugin(&'static str);

    #[async_trait]
    impl SyncPlugin for NamedPlugin {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _trade_date: NaiveDate) -> Result<PluginRunResult, PluginError> {
            Ok(PluginRunResult::success(1))
        }
    }

    #[test]
    fn test_result_parsing() {
        let raw = r#"{
            "status": "success",
            "steps": {
                "extract": {"rows": 12, "source": "api"},
                "load": {"total_records": 12}
            }
        }"#;
        let result: PluginRunResult = serde_json::from_str(raw).expect("should parse");

        assert!(result.is_success());
        assert_eq!(result.load_records(), Some(12));
        assert_eq!(
            result.steps["extract"].extra.get("source"),
            Some(&serde_json::json!("api"))
        );
    }

    #[test]
    fn test_result_without_load_step() {
        let result: PluginRunResult =
            serde_json::from_str(r#"{"status": "success", "steps": {}}"#).expect("should parse");
        assert!(result.is_success());
        assert_eq!(result.load_records(), None);
    }

    #[test]
    fn test_failure_result() {
        let result = PluginRunResult::failure("quota exceeded", Some("HTTP 429".into()));
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(NamedPlugin("tushare_daily")))
            .expect("first registration");

        let err = registry
            .register(Arc::new(NamedPlugin("tushare_daily")))
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicatePlugin(name) if name == "tushare_daily"));

        assert!(registry.contains("tushare_daily"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let registry =
            PluginRegistry::discover(Path::new("/nonexistent/datasync/plugins")).expect("ok");
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_registers_executables() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        for (name, mode) in [
            ("tushare_daily.sh", 0o755),
            ("akshare_index", 0o755),
            ("README.md", 0o644),
            (".hidden", 0o755),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, "#!/bin/sh\n").expect("write");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .expect("chmod");
        }
        std::fs::create_dir(dir.path().join("lib")).expect("mkdir");

        let registry = PluginRegistry::discover(dir.path()).expect("discover");
        assert_eq!(registry.names(), vec!["akshare_index", "tushare_daily"]);
    }
}
