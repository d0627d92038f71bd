//! Configuration loading: store folder resolution and service endpoints

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the artifact store root
pub const STORE_ROOT_ENV: &str = "GENREML_STORE_ROOT";

/// Address of a service as configured through the environment
///
/// Each service is described by a triple of variables sharing a prefix:
/// `<PREFIX>_SCHEMA`, `<PREFIX>_ADDRESS` and optionally `<PREFIX>_PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub schema: String,
    pub address: String,
    pub port: Option<u16>,
}

impl ServiceEndpoint {
    pub fn new(schema: impl Into<String>, address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            schema: schema.into(),
            address: address.into(),
            port,
        }
    }

    /// Load the `<prefix>_SCHEMA/_ADDRESS/_PORT` triple from the process environment
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Load the triple through an arbitrary variable lookup
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let schema_key = format!("{}_SCHEMA", prefix);
        let address_key = format!("{}_ADDRESS", prefix);
        let port_key = format!("{}_PORT", prefix);

        let schema = lookup(&schema_key)
            .ok_or_else(|| Error::Config(format!("{} is not set", schema_key)))?;
        let address = lookup(&address_key)
            .ok_or_else(|| Error::Config(format!("{} is not set", address_key)))?;
        let port = match lookup(&port_key) {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|e| {
                Error::Config(format!("{} is not a valid port ({}): {}", port_key, raw, e))
            })?),
            None => None,
        };

        Ok(Self::new(schema, address, port))
    }

    /// URL built from the configured address, without any discovery
    pub fn literal_url(&self) -> String {
        self.url_for_host(&self.address)
    }

    /// URL for a discovered host, keeping the configured schema and port
    pub fn url_for_host(&self, host: &str) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.schema, host, port),
            None => format!("{}://{}", self.schema, host),
        }
    }
}

/// Artifact store root resolution, priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file value
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_store_root(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        debug!("Store root: {:?} (from command line)", path);
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            debug!("Store root: {} (from {})", path, env_var_name);
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        debug!("Store root: {:?} (from TOML)", path);
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    let path = default_store_root();
    debug!("Store root: {:?} (default)", path);
    path
}

/// OS-dependent default store root
pub fn default_store_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/genreml (or /var/lib/genreml for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("genreml"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/genreml"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("genreml"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/genreml"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("genreml"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\genreml"))
    } else {
        PathBuf::from("./genreml_data")
    }
}

/// Read and parse a TOML file into `T`
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))
}
