use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::access::{AccessPolicy, Role};
use crate::hierarchy::HierarchyColumns;
use crate::lookup::OccupantColumns;
use crate::query::ColumnMatchPolicy;
use crate::store::CensusSchema;

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Create a new ConfigManager for the given app name
    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get path to a specific config file within the config directory
    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Generate default configuration template as a string
    pub fn generate_default_config(&self) -> String {
        DEFAULT_CONFIG_TEMPLATE.to_string()
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path("config.toml");

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;

        Ok(config_path)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub columns: ColumnsConfig,
    pub access: AccessConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Workbook holding the census
    pub path: PathBuf,
    /// Worksheet name; empty selects the first sheet
    pub sheet: String,
    /// Lock file shared by writers; defaults to `<path>.lock`
    pub lock_file: Option<PathBuf>,
    /// Create an empty workbook with `columns.initial_header` when the file is missing
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    /// Columns whose filter matches substrings instead of the whole cell
    pub contains_columns: Vec<String>,
    pub natural_key: String,
    pub community: Vec<String>,
    pub tower: Vec<String>,
    pub unit: Vec<String>,
    pub relationship: Vec<String>,
    pub full_name: Vec<String>,
    pub document: Vec<String>,
    pub report_columns: Vec<String>,
    pub report_title: String,
    pub initial_header: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub default_role: String,
    /// e-mail → role name
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is not set
    pub filter: String,
    /// "full" or "compact"
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            columns: ColumnsConfig::default(),
            access: AccessConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("CENSO GENERAL NUEVO.xlsx"),
            sheet: "CENSO".to_string(),
            lock_file: None,
            create_if_missing: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        let hierarchy = HierarchyColumns::default();
        let occupants = OccupantColumns::default();
        Self {
            contains_columns: strings(&["Nombre completo", "Cedula de identidad"]),
            natural_key: "Cedula de identidad".to_string(),
            community: hierarchy.community,
            tower: hierarchy.tower,
            unit: hierarchy.unit,
            relationship: occupants.relationship,
            full_name: occupants.full_name,
            document: occupants.document,
            report_columns: strings(&["Nombre completo", "Cedula de identidad", "Edad", "Genero"]),
            report_title: "Reporte de Habitantes".to_string(),
            initial_header: strings(&[
                "Comunidad",
                "Torre",
                "Casa o Apto",
                "Parentesco",
                "Nombre completo",
                "Cedula de identidad",
                "Edad",
                "Genero",
            ]),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_role: "operator".to_string(),
            users: HashMap::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { limit: 500 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        let mut config = AppConfig::default();

        if let Ok(user_config) = Self::load_user_config(app_name) {
            config.merge(user_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load defaults merged with an explicitly named file, which must exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = AppConfig::default();
        config.merge(Self::read_file(path)?);
        config.validate()?;
        Ok(config)
    }

    /// Load user configuration from ~/.config/censo/config.toml
    fn load_user_config(app_name: &str) -> Result<AppConfig> {
        let config_manager = ConfigManager::new(app_name)?;
        let config_path = config_manager.config_path("config.toml");

        if !config_path.exists() {
            return Ok(AppConfig::default());
        }
        Self::read_file(&config_path)
    }

    fn read_file(config_path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            eyre!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            eyre!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            )
        })
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }

        self.store.merge(other.store);
        self.server.merge(other.server);
        self.columns.merge(other.columns);
        self.access.merge(other.access);
        self.history.merge(other.history);
        self.logging.merge(other.logging);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(eyre!("store.path must not be empty"));
        }

        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| eyre!("Invalid server.bind {:?}: {}", self.server.bind, e))?;

        if self.server.max_body_bytes == 0 {
            return Err(eyre!("max_body_bytes must be greater than 0"));
        }

        if self.columns.natural_key.trim().is_empty() {
            return Err(eyre!("columns.natural_key must not be empty"));
        }

        for (name, aliases) in [
            ("community", &self.columns.community),
            ("tower", &self.columns.tower),
            ("unit", &self.columns.unit),
            ("relationship", &self.columns.relationship),
            ("full_name", &self.columns.full_name),
            ("document", &self.columns.document),
        ] {
            if aliases.is_empty() {
                return Err(eyre!("columns.{} needs at least one header alias", name));
            }
        }

        // Resolves every role name or fails on the first unknown one
        self.access_policy()?;

        if self.history.limit == 0 {
            return Err(eyre!("history.limit must be greater than 0"));
        }

        match self.logging.format.as_str() {
            "full" | "compact" => {}
            _ => {
                return Err(eyre!(
                    "Invalid logging.format: {}. Must be 'full' or 'compact'",
                    self.logging.format
                ))
            }
        }

        Ok(())
    }

    /// Column meaning for the store.
    pub fn schema(&self) -> CensusSchema {
        let c = &self.columns;
        CensusSchema {
            match_policy: ColumnMatchPolicy::new(&c.contains_columns),
            natural_key: c.natural_key.clone(),
            hierarchy: HierarchyColumns {
                community: c.community.clone(),
                tower: c.tower.clone(),
                unit: c.unit.clone(),
            },
            occupants: OccupantColumns {
                relationship: c.relationship.clone(),
                full_name: c.full_name.clone(),
                document: c.document.clone(),
            },
            report_columns: c.report_columns.clone(),
            report_title: c.report_title.clone(),
        }
    }

    pub fn access_policy(&self) -> Result<AccessPolicy> {
        let parse = |name: &str| {
            Role::from_name(name).ok_or_else(|| {
                eyre!(
                    "Invalid role: {}. Must be 'admin', 'operator', or 'viewer'",
                    name
                )
            })
        };
        let default_role = parse(&self.access.default_role)?;
        let users = self
            .access
            .users
            .iter()
            .map(|(email, role)| Ok((email.clone(), parse(role)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(AccessPolicy::new(users, default_role))
    }
}

// Merge implementations for each config section
impl StoreConfig {
    pub fn merge(&mut self, other: Self) {
        let default = StoreConfig::default();
        if other.path != default.path {
            self.path = other.path;
        }
        if other.sheet != default.sheet {
            self.sheet = other.sheet;
        }
        if other.lock_file.is_some() {
            self.lock_file = other.lock_file;
        }
        if other.create_if_missing != default.create_if_missing {
            self.create_if_missing = other.create_if_missing;
        }
    }
}

impl ServerConfig {
    pub fn merge(&mut self, other: Self) {
        let default = ServerConfig::default();
        if other.bind != default.bind {
            self.bind = other.bind;
        }
        if other.max_body_bytes != default.max_body_bytes {
            self.max_body_bytes = other.max_body_bytes;
        }
    }
}

impl ColumnsConfig {
    pub fn merge(&mut self, other: Self) {
        let default = ColumnsConfig::default();
        if other.contains_columns != default.contains_columns {
            self.contains_columns = other.contains_columns;
        }
        if other.natural_key != default.natural_key {
            self.natural_key = other.natural_key;
        }
        if other.community != default.community {
            self.community = other.community;
        }
        if other.tower != default.tower {
            self.tower = other.tower;
        }
        if other.unit != default.unit {
            self.unit = other.unit;
        }
        if other.relationship != default.relationship {
            self.relationship = other.relationship;
        }
        if other.full_name != default.full_name {
            self.full_name = other.full_name;
        }
        if other.document != default.document {
            self.document = other.document;
        }
        if other.report_columns != default.report_columns {
            self.report_columns = other.report_columns;
        }
        if other.report_title != default.report_title {
            self.report_title = other.report_title;
        }
        if other.initial_header != default.initial_header {
            self.initial_header = other.initial_header;
        }
    }
}

impl AccessConfig {
    pub fn merge(&mut self, other: Self) {
        let default = AccessConfig::default();
        if other.default_role != default.default_role {
            self.default_role = other.default_role;
        }
        self.users.extend(other.users);
    }
}

impl HistoryConfig {
    pub fn merge(&mut self, other: Self) {
        if other.limit != HistoryConfig::default().limit {
            self.limit = other.limit;
        }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        let default = LoggingConfig::default();
        if other.filter != default.filter {
            self.filter = other.filter;
        }
        if other.format != default.format {
            self.format = other.format;
        }
    }
}

/// Everything the server needs at startup, after CLI overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ServeOptions {
    pub path: PathBuf,
    pub sheet: Option<String>,
    pub lock_file: Option<PathBuf>,
    pub create_if_missing: bool,
    pub bind: SocketAddr,
    pub max_body_bytes: usize,
    pub log_filter: String,
    pub log_format: censo_cli::LogFormat,
}

impl ServeOptions {
    /// Create ServeOptions from CLI args and config, with CLI args taking precedence
    pub fn from_args_and_config(args: &censo_cli::Args, config: &AppConfig) -> Result<Self> {
        let path = args.file.clone().unwrap_or_else(|| config.store.path.clone());
        let sheet = args
            .sheet
            .clone()
            .unwrap_or_else(|| config.store.sheet.clone());
        let sheet = Some(sheet).filter(|s| !s.trim().is_empty());

        let bind = args.bind.as_deref().unwrap_or(&config.server.bind);
        let bind = bind
            .parse::<SocketAddr>()
            .map_err(|e| eyre!("Invalid bind address {:?}: {}", bind, e))?;

        let log_format = match args.log_format {
            Some(format) => format,
            None => censo_cli::LogFormat::from_name(&config.logging.format)
                .ok_or_else(|| eyre!("Invalid logging.format: {}", config.logging.format))?,
        };

        Ok(Self {
            path,
            sheet,
            lock_file: config.store.lock_file.clone(),
            create_if_missing: config.store.create_if_missing,
            bind,
            max_body_bytes: config.server.max_body_bytes,
            log_filter: args
                .log_filter
                .clone()
                .unwrap_or_else(|| config.logging.filter.clone()),
            log_format,
        })
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../config/default.toml");
