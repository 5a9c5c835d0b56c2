//! Command-line surface and the synchronous commands behind it.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::secrets::{
    EnvSnapshot, EnvStore, KeyGenerator, ProvisionReport, SecretEntry, SecretProvisioner,
    SecretSpec, ValueSource,
};
use clap::{Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bootkeys", version)]
#[command(about = "Provision startup secrets into a .env store, then serve")]
pub struct Cli {
    /// Extra TOML config file, layered over config/default and config/local
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ensure all secrets exist, then start the HTTP server (default)
    Serve,
    /// Provision the primary signing key
    Generate(GenerateOpts),
    /// Provision the session hash and block keys
    Keys(StoreOpts),
    /// Report which required secrets are present
    Status(StoreOpts),
}

#[derive(clap::Args)]
pub struct StoreOpts {
    /// Store file to use instead of the configured one
    #[arg(short, long)]
    pub store: Option<PathBuf>,
}

impl StoreOpts {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.store {
            config.store.path = path.clone();
        }
    }
}

#[derive(clap::Args)]
pub struct GenerateOpts {
    #[command(flatten)]
    pub store: StoreOpts,
    /// Replace an existing signing key with a new one
    #[arg(long)]
    pub force: bool,
}

/// Provision (or with `force`, replace) the primary signing key.
pub fn generate(
    config: &AppConfig,
    env: &EnvSnapshot,
    generator: &dyn KeyGenerator,
    force: bool,
) -> AppResult<ProvisionReport> {
    let store = EnvStore::from_config(&config.store);
    let provisioner = SecretProvisioner::new(&store, env, generator);
    let spec = config.secrets.signing_spec();
    let report = if force {
        provisioner.regenerate(&spec)?
    } else {
        provisioner.provision(&spec)?
    };
    Ok(report)
}

/// Provision the hash and block keys, each only if absent.
pub fn keys(
    config: &AppConfig,
    env: &EnvSnapshot,
    generator: &dyn KeyGenerator,
) -> AppResult<Vec<ProvisionReport>> {
    let store = EnvStore::from_config(&config.store);
    let provisioner = SecretProvisioner::new(&store, env, generator);
    Ok(provisioner.provision_all(&config.secrets.session_specs())?)
}

/// One line of `status` output.
#[derive(Debug)]
pub struct StatusLine {
    pub entry: SecretEntry,
    pub source: Option<ValueSource>,
    pub spec: SecretSpec,
    /// Decoded byte length, `None` if the value does not decode.
    pub decoded_len: Option<usize>,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.entry.name;
        match (self.source, self.decoded_len) {
            (None, _) => write!(f, "{} missing", name),
            (Some(source), Some(len)) if len == self.spec.length => {
                write!(f, "{} present ({}, {} bytes)", name, source, len)
            }
            (Some(source), Some(len)) => write!(
                f,
                "{} present ({}, {} bytes, expected {})",
                name, source, len, self.spec.length
            ),
            (Some(source), None) => write!(
                f,
                "{} present ({}, not valid {})",
                name, source, self.spec.encoding
            ),
        }
    }
}

/// Inspect every required secret without generating anything.
pub fn status(config: &AppConfig, env: &EnvSnapshot) -> AppResult<Vec<StatusLine>> {
    let store = EnvStore::from_config(&config.store);
    let file = store.load()?;

    let lines = config
        .secrets
        .all_specs()
        .into_iter()
        .map(|spec| {
            let (value, source) = match env.get(&spec.name) {
                Some(value) => (Some(value), Some(ValueSource::Environment)),
                None => match file.get(&spec.name) {
                    Some(value) => (Some(value), Some(ValueSource::Store)),
                    None => (None, None),
                },
            };
            let decoded_len = value
                .and_then(|v| spec.encoding.decode(v).ok())
                .map(|bytes| bytes.len());
            StatusLine {
                entry: SecretEntry {
                    name: spec.name.clone(),
                    value: value.and_then(crate::secrets::SecretValue::new),
                },
                source,
                spec,
                decoded_len,
            }
        })
        .collect();

    Ok(lines)
}

/// Error out when any status line reports a missing secret.
pub fn require_present(lines: &[StatusLine]) -> AppResult<()> {
    let missing: Vec<String> = lines
        .iter()
        .filter(|line| !line.entry.present())
        .map(|line| line.entry.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::MissingSecrets(missing))
    }
}
