//! Configuration for placejoin.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line arguments (output directory only)
//! 2. Environment variables (PLACEJOIN_OUTPUT_DIR, PLACEJOIN_DATABASE)
//! 3. Config file (--config, or .placejoin/config.yaml in the current
//!    directory or a parent)
//! 4. Defaults
//!
//! Relative paths in the config file are resolved against the project root,
//! i.e. the directory that contains `.placejoin/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".placejoin";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

pub const ENV_OUTPUT_DIR: &str = "PLACEJOIN_OUTPUT_DIR";
pub const ENV_DATABASE: &str = "PLACEJOIN_DATABASE";

/// Snapshot of the settings that shape artifacts, kept in the output directory
pub const SETTINGS_STAMP: &str = ".placejoin-settings.json";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub filters: FilterSettings,
    #[serde(default)]
    pub import: ImportSettings,
}

/// Connection to the spatial store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database")]
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
}

fn default_database() -> String {
    "gis".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            name: default_database(),
            host: None,
            port: None,
            user: None,
        }
    }
}

impl DatabaseSettings {
    /// Connection flags understood by psql
    pub fn psql_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.extend(["-h".to_string(), host.clone()]);
        }
        if let Some(port) = self.port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(user) = &self.user {
            args.extend(["-U".to_string(), user.clone()]);
        }
        args.extend(["-d".to_string(), self.name.clone()]);
        args
    }

    /// Connection flags understood by osm2pgsql
    pub fn osm2pgsql_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.extend(["-H".to_string(), host.clone()]);
        }
        if let Some(port) = self.port {
            args.extend(["-P".to_string(), port.to_string()]);
        }
        if let Some(user) = &self.user {
            args.extend(["-U".to_string(), user.clone()]);
        }
        args.extend(["-d".to_string(), self.name.clone()]);
        args
    }
}

/// External binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_osmium")]
    pub osmium: String,
    #[serde(default = "default_osm2pgsql")]
    pub osm2pgsql: String,
    #[serde(default = "default_psql")]
    pub psql: String,
    /// Downstream report generator, called as `<report> <export> <report-path>`
    #[serde(default = "default_report")]
    pub report: String,
}

fn default_osmium() -> String {
    "osmium".to_string()
}
fn default_osm2pgsql() -> String {
    "osm2pgsql".to_string()
}
fn default_psql() -> String {
    "psql".to_string()
}
fn default_report() -> String {
    "place-chains".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            osmium: default_osmium(),
            osm2pgsql: default_osm2pgsql(),
            psql: default_psql(),
            report: default_report(),
        }
    }
}

/// osmium tags-filter expressions for the two extracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default = "default_place_filters")]
    pub places: Vec<String>,
    #[serde(default = "default_boundary_filters")]
    pub boundaries: Vec<String>,
}

fn default_place_filters() -> Vec<String> {
    vec!["n/place".to_string()]
}
fn default_boundary_filters() -> Vec<String> {
    vec!["wr/boundary=administrative".to_string()]
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            places: default_place_filters(),
            boundaries: default_boundary_filters(),
        }
    }
}

/// osm2pgsql tuning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Style file (osm2pgsql's default style if unset)
    #[serde(default)]
    pub style: Option<PathBuf>,
    /// Node cache size in MB
    #[serde(default)]
    pub cache_mb: Option<u32>,
    #[serde(default)]
    pub processes: Option<u32>,
    /// Passed through verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Where artifacts are written (before any command-line override)
    pub output_dir: PathBuf,
    pub database: DatabaseSettings,
    pub tools: ToolPaths,
    pub filters: FilterSettings,
    pub import: ImportSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// The part of the configuration that changes what artifacts contain
#[derive(Serialize)]
struct SettingsSnapshot<'a> {
    database: &'a DatabaseSettings,
    filters: &'a FilterSettings,
    import: &'a ImportSettings,
}

impl ResolvedConfig {
    /// Files whose modification invalidates every artifact
    pub fn definition_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::env::current_exe().into_iter().collect();
        paths.extend(self.config_file.clone());
        paths
    }

    /// Record the artifact-shaping settings in `output_dir`.
    ///
    /// The stamp is rewritten only when its content changes, so switching
    /// database through the environment gives it a new modification time
    /// and every artifact goes stale. Returns the stamp's path.
    pub fn record_settings(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(SETTINGS_STAMP);
        let snapshot = serde_json::to_string_pretty(&SettingsSnapshot {
            database: &self.database,
            filters: &self.filters,
            import: &self.import,
        })
        .context("Failed to serialize settings")?;

        let unchanged = std::fs::read_to_string(&path)
            .map(|current| current == snapshot)
            .unwrap_or(false);
        if !unchanged {
            std::fs::write(&path, snapshot)
                .with_context(|| format!("Failed to write settings stamp: {}", path.display()))?;
        }
        Ok(path)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Project root for a config file: the parent of `.placejoin/`, or the
/// file's own directory for a config passed explicitly elsewhere
fn base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    match parent.file_name() {
        Some(name) if name == CONFIG_DIR => parent.parent().unwrap_or(Path::new(".")).to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Merge a parsed config file and environment lookups into final settings
fn resolve(
    config_file: Option<PathBuf>,
    file: Option<ConfigFile>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let base = config_file
        .as_deref()
        .map(base_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let (output_dir, mut database, tools, filters, mut import) = match file {
        Some(file) => (
            file.output_dir.map(|dir| resolve_path(&base, Path::new(&dir))),
            file.database,
            file.tools,
            file.filters,
            file.import,
        ),
        None => (
            None,
            DatabaseSettings::default(),
            ToolPaths::default(),
            FilterSettings::default(),
            ImportSettings::default(),
        ),
    };

    import.style = import.style.map(|style| resolve_path(&base, &style));

    if let Some(name) = env(ENV_DATABASE) {
        database.name = name;
    }

    let output_dir = env(ENV_OUTPUT_DIR)
        .map(PathBuf::from)
        .or(output_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    if filters.places.is_empty() || filters.boundaries.is_empty() {
        anyhow::bail!("filters.places and filters.boundaries need at least one expression each");
    }

    Ok(ResolvedConfig {
        output_dir,
        database,
        tools,
        filters,
        import,
        config_file,
    })
}

/// Load configuration from all sources
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let file = config_file
        .as_deref()
        .map(load_config_file)
        .transpose()?;

    resolve(config_file, file, |key| std::env::var(key).ok())
}
