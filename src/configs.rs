//! Process configuration loaded from a TOML file.
//!
//! The `[rootca]` table declares the root authority and, nested inside it,
//! the initially configured tree. Everything else tunes where artifacts go
//! and how the external toolkit and the OCSP responder are reached.

use crate::errors::{Error, Result};
use crate::store::AuthorityRecord;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_ca_path")]
    pub ca_path: PathBuf,
    /// Directory containing the `openssl` binary; empty means "use PATH".
    #[serde(default)]
    pub openssl_path: PathBuf,
    #[serde(default = "default_password")]
    pub default_password: String,
    /// Port of the (external) download surface, stamped into CRL
    /// distribution point URLs.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_ocsp_port")]
    pub ocsp_port: u16,
    /// Purge every regenerable file (everything except private keys)
    /// before building.
    #[serde(default)]
    pub recreate: bool,
    /// Durable copy of the authority tree, rewritten after each mutation.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    pub rootca: AuthorityRecord,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_ca_path() -> PathBuf {
    PathBuf::from("ca")
}

fn default_password() -> String {
    "changeit".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_ocsp_port() -> u16 {
    8181
}

fn default_db_path() -> PathBuf {
    PathBuf::from("certforge-db.toml")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&config_str).map_err(|source| Error::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Load configuration with default path (certforge.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("certforge.toml")
    }

    /// Resolved path of the `openssl` binary.
    pub fn openssl_bin(&self) -> PathBuf {
        if self.openssl_path.as_os_str().is_empty() {
            PathBuf::from("openssl")
        } else {
            self.openssl_path.join("openssl")
        }
    }
}
