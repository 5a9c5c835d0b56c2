use crate::secrets::{is_valid_key, KeyEncoding, SecretSpec};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Secret store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path of the `.env` file holding provisioned secrets
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long a writer waits for the store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".env")
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Names, sizes and encodings of the provisioned secrets.
///
/// The signing key backs the API service; the hash and block keys back
/// session cookies (HMAC key and AES key respectively).
#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default = "default_signing_key")]
    pub signing_key: String,
    #[serde(default = "default_signing_key_bytes")]
    pub signing_key_bytes: usize,
    #[serde(default = "default_signing_key_encoding")]
    pub signing_key_encoding: KeyEncoding,
    #[serde(default = "default_hash_key")]
    pub hash_key: String,
    #[serde(default = "default_session_key_bytes")]
    pub hash_key_bytes: usize,
    #[serde(default = "default_block_key")]
    pub block_key: String,
    /// Must be a valid AES key size: 16, 24 or 32
    #[serde(default = "default_session_key_bytes")]
    pub block_key_bytes: usize,
    #[serde(default = "default_session_key_encoding")]
    pub session_key_encoding: KeyEncoding,
}

fn default_signing_key() -> String {
    "SECRET_KEY".to_string()
}

fn default_signing_key_bytes() -> usize {
    64
}

fn default_signing_key_encoding() -> KeyEncoding {
    KeyEncoding::Base64
}

fn default_hash_key() -> String {
    "HASH_KEY".to_string()
}

fn default_block_key() -> String {
    "BLOCK_KEY".to_string()
}

fn default_session_key_bytes() -> usize {
    16
}

fn default_session_key_encoding() -> KeyEncoding {
    KeyEncoding::Hex
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            signing_key: default_signing_key(),
            signing_key_bytes: default_signing_key_bytes(),
            signing_key_encoding: default_signing_key_encoding(),
            hash_key: default_hash_key(),
            hash_key_bytes: default_session_key_bytes(),
            block_key: default_block_key(),
            block_key_bytes: default_session_key_bytes(),
            session_key_encoding: default_session_key_encoding(),
        }
    }
}

impl SecretsConfig {
    pub fn signing_spec(&self) -> SecretSpec {
        SecretSpec::new(&self.signing_key, self.signing_key_bytes, self.signing_key_encoding)
    }

    /// Hash key then block key.
    pub fn session_specs(&self) -> [SecretSpec; 2] {
        [
            SecretSpec::new(&self.hash_key, self.hash_key_bytes, self.session_key_encoding),
            SecretSpec::new(&self.block_key, self.block_key_bytes, self.session_key_encoding),
        ]
    }

    /// Every secret the server requires before serving.
    pub fn all_specs(&self) -> Vec<SecretSpec> {
        let mut specs = vec![self.signing_spec()];
        specs.extend(self.session_specs());
        specs
    }

    pub fn names(&self) -> [&str; 3] {
        [
            self.signing_key.as_str(),
            self.hash_key.as_str(),
            self.block_key.as_str(),
        ]
    }
}

/// How the bootstrap gate provisions a missing signing key.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStrategy {
    /// Call the provisioner directly.
    #[default]
    InProcess,
    /// Run `<self> generate` as a child process and wait for it.
    Subprocess,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub strategy: BootstrapStrategy,
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (prefix: BOOTKEYS_)
            // e.g., BOOTKEYS_SERVER__PORT, BOOTKEYS_STORE__PATH
            .add_source(
                Environment::with_prefix("BOOTKEYS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce usable secrets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secrets = &self.secrets;

        for spec in secrets.all_specs() {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Message("secret names must not be empty".into()));
            }
            if !is_valid_key(&spec.name) {
                return Err(ConfigError::Message(format!(
                    "{}: secret names must match [A-Za-z_][A-Za-z0-9_]*",
                    spec.name
                )));
            }
            if spec.length == 0 {
                return Err(ConfigError::Message(format!(
                    "{}: key length must be positive",
                    spec.name
                )));
            }
        }

        if ![16, 24, 32].contains(&secrets.block_key_bytes) {
            return Err(ConfigError::Message(format!(
                "{}: block key must be 16, 24 or 32 bytes, got {}",
                secrets.block_key, secrets.block_key_bytes
            )));
        }

        let unique: HashSet<&str> = secrets.names().into_iter().collect();
        if unique.len() != secrets.names().len() {
            return Err(ConfigError::Message("secret names must be distinct".into()));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Message("store.path must not be empty".into()));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
