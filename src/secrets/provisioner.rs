//! Generate-if-absent provisioning of named secrets.
//!
//! Each secret moves through `CHECKED -> SATISFIED` when a value already
//! exists (in the startup environment snapshot or the store), or
//! `CHECKED -> GENERATING -> PERSISTED` when it does not. Persisting goes
//! through [`EnvStore::insert_if_absent`], so a value written concurrently
//! by another process wins over the one generated here.

use super::encoder::KeyEncoding;
use super::generator::{EntropyError, KeyGenerator};
use super::store::{EnvStore, Insert, StoreError, ValueStyle};
use super::value::SecretValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroize;

/// Provisioning failures, always naming the secret.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to generate {name}: {source}")]
    Entropy {
        name: String,
        #[source]
        source: EntropyError,
    },

    #[error("Failed to persist {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },
}

impl ProvisionError {
    /// Name of the secret that failed.
    pub fn secret_name(&self) -> &str {
        match self {
            Self::Entropy { name, .. } | Self::Store { name, .. } => name,
        }
    }
}

/// What to provision: a store key, its raw byte length and its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub length: usize,
    pub encoding: KeyEncoding,
}

impl SecretSpec {
    pub fn new(name: impl Into<String>, length: usize, encoding: KeyEncoding) -> Self {
        Self {
            name: name.into(),
            length,
            encoding,
        }
    }
}

/// Process environment values captured once at startup.
///
/// Values injected by the hosting process take precedence over the store.
/// The snapshot is never written back to the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the listed names from the current process environment.
    pub fn capture<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let vars = names
            .into_iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Non-empty value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Where an existing value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Environment,
    Store,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("environment"),
            Self::Store => f.write_str("store"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A value existed; nothing was written.
    AlreadyDefined { source: ValueSource },
    /// No value existed; a new one was generated and persisted.
    Generated,
    /// An existing value was replaced on request.
    Updated,
}

/// Result of provisioning one secret.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub name: String,
    pub outcome: ProvisionOutcome,
    pub value: SecretValue,
    pub store_path: PathBuf,
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            ProvisionOutcome::Generated => write!(
                f,
                "{} generated and saved to {}",
                self.name,
                self.store_path.display()
            ),
            ProvisionOutcome::AlreadyDefined { source } => {
                write!(f, "{} already defined ({}), not regenerated", self.name, source)
            }
            ProvisionOutcome::Updated => {
                write!(f, "{} updated in {}", self.name, self.store_path.display())
            }
        }
    }
}

/// Provisions secrets against one store.
pub struct SecretProvisioner<'a> {
    store: &'a EnvStore,
    env: &'a EnvSnapshot,
    generator: &'a dyn KeyGenerator,
}

impl<'a> SecretProvisioner<'a> {
    pub fn new(store: &'a EnvStore, env: &'a EnvSnapshot, generator: &'a dyn KeyGenerator) -> Self {
        Self {
            store,
            env,
            generator,
        }
    }

    /// Current value of a secret, if any. Store read failures degrade to
    /// absent.
    pub fn check(&self, name: &str) -> Option<(SecretValue, ValueSource)> {
        if let Some(value) = self.env.get(name).and_then(SecretValue::new) {
            return Some((value, ValueSource::Environment));
        }
        match self.store.read_value(name) {
            Ok(value) => value
                .and_then(SecretValue::new)
                .map(|v| (v, ValueSource::Store)),
            Err(e) => {
                warn!(name, error = %e, "Store unreadable, treating secret as absent");
                None
            }
        }
    }

    /// Generate-if-absent for a single secret.
    pub fn provision(&self, spec: &SecretSpec) -> Result<ProvisionReport, ProvisionError> {
        if let Some((value, source)) = self.check(&spec.name) {
            info!(name = %spec.name, %source, "Secret already defined, not regenerated");
            return Ok(self.report(spec, ProvisionOutcome::AlreadyDefined { source }, value));
        }

        info!(name = %spec.name, bytes = spec.length, encoding = %spec.encoding, "Secret not defined, generating");
        let encoded = self.generate(spec)?;

        let inserted = self
            .store
            .insert_if_absent(&spec.name, encoded.expose(), ValueStyle::Bare)
            .map_err(|source| ProvisionError::Store {
                name: spec.name.clone(),
                source,
            })?;

        match inserted {
            Insert::Inserted => {
                info!(name = %spec.name, path = %self.store.path().display(), "Secret generated and saved");
                Ok(self.report(spec, ProvisionOutcome::Generated, encoded))
            }
            Insert::Existing(existing) => {
                // Another writer persisted a value between the check and the lock.
                info!(name = %spec.name, "Secret persisted concurrently, adopting stored value");
                let value = SecretValue::new(existing).unwrap_or(encoded);
                Ok(self.report(
                    spec,
                    ProvisionOutcome::AlreadyDefined {
                        source: ValueSource::Store,
                    },
                    value,
                ))
            }
        }
    }

    /// Provision each spec in order. A satisfied secret never stops the
    /// batch; the first failure does.
    pub fn provision_all(&self, specs: &[SecretSpec]) -> Result<Vec<ProvisionReport>, ProvisionError> {
        specs.iter().map(|spec| self.provision(spec)).collect()
    }

    /// Replace a secret with a freshly generated value, written quoted.
    pub fn regenerate(&self, spec: &SecretSpec) -> Result<ProvisionReport, ProvisionError> {
        let existed = self.check(&spec.name).is_some();
        let encoded = self.generate(spec)?;

        self.store
            .write_value(&spec.name, encoded.expose(), ValueStyle::Quoted)
            .map_err(|source| ProvisionError::Store {
                name: spec.name.clone(),
                source,
            })?;

        let outcome = if existed {
            ProvisionOutcome::Updated
        } else {
            ProvisionOutcome::Generated
        };
        info!(name = %spec.name, path = %self.store.path().display(), ?outcome, "Secret regenerated");
        Ok(self.report(spec, outcome, encoded))
    }

    fn generate(&self, spec: &SecretSpec) -> Result<SecretValue, ProvisionError> {
        let entropy_err = |source: EntropyError| ProvisionError::Entropy {
            name: spec.name.clone(),
            source,
        };
        let mut bytes = self.generator.generate(spec.length).map_err(entropy_err)?;
        let encoded = spec.encoding.encode(&bytes);
        bytes.zeroize();
        // A generator honouring its contract never yields empty output.
        SecretValue::new(encoded).ok_or_else(|| entropy_err(EntropyError::ZeroLength))
    }

    fn report(&self, spec: &SecretSpec, outcome: ProvisionOutcome, value: SecretValue) -> ProvisionReport {
        ProvisionReport {
            name: spec.name.clone(),
            outcome,
            value,
            store_path: self.store.path().to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::generator::OsKeyGenerator;
    use std::fs;
    use tempfile::TempDir;

    struct BrokenGenerator;

    impl KeyGenerator for BrokenGenerator {
        fn generate(&self, _length: usize) -> Result<Vec<u8>, EntropyError> {
            Err(EntropyError::ZeroLength)
        }
    }

    fn signing_spec() -> SecretSpec {
        SecretSpec::new("SECRET_KEY", 64, KeyEncoding::Base64)
    }

    fn temp_store() -> (EnvStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (EnvStore::new(dir.path().join(".env")), dir)
    }

    #[test]
    fn generates_when_absent() {
        let (store, _dir) = temp_store();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let report = provisioner.provision(&signing_spec()).unwrap();

        assert_eq!(report.outcome, ProvisionOutcome::Generated);
        let stored = store.read_value("SECRET_KEY").unwrap().unwrap();
        assert_eq!(stored, report.value.expose());
        assert_eq!(KeyEncoding::Base64.decode(&stored).unwrap().len(), 64);
    }

    #[test]
    fn presence_short_circuits() {
        let (store, _dir) = temp_store();
        fs::write(store.path(), "SECRET_KEY=abc\n").unwrap();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let report = provisioner.provision(&signing_spec()).unwrap();

        assert_eq!(
            report.outcome,
            ProvisionOutcome::AlreadyDefined {
                source: ValueSource::Store
            }
        );
        assert_eq!(report.value.expose(), "abc");
        assert!(report.to_string().contains("already defined"));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "SECRET_KEY=abc\n");
    }

    #[test]
    fn environment_value_wins_and_is_not_persisted() {
        let (store, _dir) = temp_store();
        let env = EnvSnapshot::empty().with("SECRET_KEY", "injected");
        let provisioner = SecretProvisioner::new(&store, &env, &BrokenGenerator);

        let report = provisioner.provision(&signing_spec()).unwrap();

        assert_eq!(
            report.outcome,
            ProvisionOutcome::AlreadyDefined {
                source: ValueSource::Environment
            }
        );
        assert_eq!(report.value.expose(), "injected");
        assert!(!store.path().exists());
    }

    #[test]
    fn empty_environment_value_counts_as_absent() {
        let (store, _dir) = temp_store();
        let env = EnvSnapshot::empty().with("SECRET_KEY", "");
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let report = provisioner.provision(&signing_spec()).unwrap();
        assert_eq!(report.outcome, ProvisionOutcome::Generated);
    }

    #[test]
    fn idempotent_across_runs() {
        let (store, _dir) = temp_store();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let first = provisioner.provision(&signing_spec()).unwrap();
        let second = provisioner.provision(&signing_spec()).unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(
            second.outcome,
            ProvisionOutcome::AlreadyDefined {
                source: ValueSource::Store
            }
        );
    }

    #[test]
    fn entropy_failure_names_secret_and_leaves_store_alone() {
        let (store, _dir) = temp_store();
        fs::write(store.path(), "FOO=bar\n").unwrap();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &BrokenGenerator);

        let err = provisioner.provision(&signing_spec()).unwrap_err();

        assert_eq!(err.secret_name(), "SECRET_KEY");
        assert!(err.to_string().contains("SECRET_KEY"));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "FOO=bar\n");
    }

    #[test]
    fn batch_continues_past_satisfied_secrets() {
        let (store, _dir) = temp_store();
        fs::write(store.path(), "HASH_KEY=aaaa\n").unwrap();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let reports = provisioner
            .provision_all(&[
                SecretSpec::new("HASH_KEY", 16, KeyEncoding::Hex),
                SecretSpec::new("BLOCK_KEY", 16, KeyEncoding::Hex),
            ])
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].outcome, ProvisionOutcome::AlreadyDefined { .. }));
        assert_eq!(reports[1].outcome, ProvisionOutcome::Generated);
        assert_eq!(reports[1].value.len(), 32);
    }

    #[test]
    fn regenerate_reports_update_and_quotes_value() {
        let (store, _dir) = temp_store();
        fs::write(store.path(), "SECRET_KEY=abc\n").unwrap();
        let env = EnvSnapshot::empty();
        let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);

        let report = provisioner.regenerate(&signing_spec()).unwrap();

        assert_eq!(report.outcome, ProvisionOutcome::Updated);
        assert!(report.to_string().contains("updated"));
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, format!("SECRET_KEY=\"{}\"\n", report.value.expose()));
        assert_eq!(store.read_value("SECRET_KEY").unwrap().unwrap(), report.value.expose());
    }

    #[test]
    fn report_lines() {
        let report = ProvisionReport {
            name: "SECRET_KEY".to_string(),
            outcome: ProvisionOutcome::Generated,
            value: SecretValue::new("x").unwrap(),
            store_path: PathBuf::from(".env"),
        };
        assert_eq!(report.to_string(), "SECRET_KEY generated and saved to .env");
    }
}
