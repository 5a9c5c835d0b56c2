//! Startup gate: every required secret is resolved before the server binds.
//!
//! The primary signing key is checked first. When it is missing it is
//! provisioned either in-process or by running this program's `generate`
//! command as a child process, depending on [`BootstrapStrategy`]. The session
//! keys (hash and block) are then provisioned unconditionally, each one
//! generated only if absent.

use crate::config::{AppConfig, BootstrapStrategy};
use crate::secrets::{
    EnvSnapshot, EnvStore, KeyGenerator, OsKeyGenerator, ProvisionError, ProvisionOutcome,
    SecretProvisioner, SecretValue,
};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Failed to launch generator {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Generator process exited with {status}")]
    GeneratorFailed { status: ExitStatus },

    #[error("{name} still missing after generator completed")]
    StillMissing { name: String },

    #[error("Bootstrap task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Secrets resolved at startup, handed to the server by reference.
#[derive(Debug, Clone)]
pub struct RuntimeSecrets {
    pub signing_key: SecretValue,
    pub hash_key: SecretValue,
    pub block_key: SecretValue,
    outcomes: Vec<(String, ProvisionOutcome)>,
}

impl RuntimeSecrets {
    /// How each secret was resolved, in provisioning order.
    pub fn outcomes(&self) -> &[(String, ProvisionOutcome)] {
        &self.outcomes
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|(name, _)| name.as_str())
    }
}

pub struct BootstrapGate<'a> {
    config: &'a AppConfig,
    env: &'a EnvSnapshot,
    generator: &'a dyn KeyGenerator,
    generator_program: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl<'a> BootstrapGate<'a> {
    pub fn new(config: &'a AppConfig, env: &'a EnvSnapshot, generator: &'a dyn KeyGenerator) -> Self {
        Self {
            config,
            env,
            generator,
            generator_program: None,
            config_file: None,
        }
    }

    /// Program run by the subprocess strategy. Defaults to the current
    /// executable.
    pub fn with_generator_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.generator_program = Some(program.into());
        self
    }

    /// Config file forwarded to the generator process.
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn run(&self) -> Result<RuntimeSecrets, BootstrapError> {
        let store = EnvStore::from_config(&self.config.store);
        let provisioner = SecretProvisioner::new(&store, self.env, self.generator);
        let mut outcomes = Vec::with_capacity(3);

        let (signing_key, outcome) = self.ensure_signing_key(&store, &provisioner)?;
        outcomes.push((self.config.secrets.signing_key.clone(), outcome));

        let [hash_spec, block_spec] = self.config.secrets.session_specs();
        let hash = provisioner.provision(&hash_spec)?;
        outcomes.push((hash.name.clone(), hash.outcome));
        let block = provisioner.provision(&block_spec)?;
        outcomes.push((block.name.clone(), block.outcome));

        info!(store = %store.path().display(), "All required secrets available");
        Ok(RuntimeSecrets {
            signing_key,
            hash_key: hash.value,
            block_key: block.value,
            outcomes,
        })
    }

    fn ensure_signing_key(
        &self,
        store: &EnvStore,
        provisioner: &SecretProvisioner<'_>,
    ) -> Result<(SecretValue, ProvisionOutcome), BootstrapError> {
        let spec = self.config.secrets.signing_spec();

        if let Some((value, source)) = provisioner.check(&spec.name) {
            info!(name = %spec.name, %source, "Signing key defined, continuing startup");
            return Ok((value, ProvisionOutcome::AlreadyDefined { source }));
        }

        match self.config.bootstrap.strategy {
            BootstrapStrategy::InProcess => {
                info!(name = %spec.name, "Signing key missing, provisioning in-process");
                let report = provisioner.provision(&spec)?;
                Ok((report.value, report.outcome))
            }
            BootstrapStrategy::Subprocess => {
                info!(name = %spec.name, "Signing key missing, running generator process");
                let generated = self.spawn_generator(store, &spec.name)?;
                match provisioner.check(&spec.name) {
                    Some((value, _)) if generated => Ok((value, ProvisionOutcome::Generated)),
                    Some((value, source)) => {
                        info!(name = %spec.name, %source, "Signing key was defined by another process");
                        Ok((value, ProvisionOutcome::AlreadyDefined { source }))
                    }
                    None => Err(BootstrapError::StillMissing { name: spec.name }),
                }
            }
        }
    }

    /// Run `generate` in a child process. Returns whether the child reports
    /// having generated `name` itself.
    fn spawn_generator(&self, store: &EnvStore, name: &str) -> Result<bool, BootstrapError> {
        let program = match &self.generator_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|source| BootstrapError::Spawn {
                program: PathBuf::from("<current executable>"),
                source,
            })?,
        };

        let mut command = Command::new(&program);
        if let Some(config_file) = &self.config_file {
            command.arg("--config").arg(config_file);
        }
        command.arg("generate").arg("--store").arg(store.path());

        let output = command
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| BootstrapError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            error!(program = %program.display(), status = %output.status, "Generator process failed");
            return Err(BootstrapError::GeneratorFailed {
                status: output.status,
            });
        }
        info!(program = %program.display(), "Generator process completed");
        Ok(reports_generated(&String::from_utf8_lossy(&output.stdout), name))
    }
}

/// Run the gate with OS entropy on a blocking thread. Store I/O, lock waits
/// and the generator process stay off the async workers.
pub async fn run_blocking(
    config: AppConfig,
    config_file: Option<PathBuf>,
) -> Result<RuntimeSecrets, BootstrapError> {
    tokio::task::spawn_blocking(move || {
        let env = EnvSnapshot::capture(config.secrets.names());
        BootstrapGate::new(&config, &env, &OsKeyGenerator)
            .with_config_file(config_file)
            .run()
    })
    .await?
}

fn reports_generated(stdout: &str, name: &str) -> bool {
    let prefix = format!("{} generated", name);
    stdout.lines().any(|line| line.starts_with(&prefix))
}
