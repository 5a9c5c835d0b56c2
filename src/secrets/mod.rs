//! Secret provisioning backed by a local `.env` store.
//!
//! Secrets are generated once, persisted, and reused on every later start.
//!
//! ## Components
//!
//! - [`generator`]: raw key bytes from the OS CSPRNG
//! - [`encoder`]: base64 / hex text encodings
//! - [`store`]: read-merge-write `.env` file with atomic replace
//! - [`lock`]: cross-process lock serialising store writers
//! - [`provisioner`]: generate-if-absent per named secret
//!
//! ## Usage
//!
//! ```ignore
//! let store = EnvStore::new(".env");
//! let env = EnvSnapshot::capture(["SECRET_KEY"]);
//! let provisioner = SecretProvisioner::new(&store, &env, &OsKeyGenerator);
//!
//! let report = provisioner.provision(&SecretSpec::new("SECRET_KEY", 64, KeyEncoding::Base64))?;
//! println!("{}", report);
//! ```

pub mod encoder;
pub mod generator;
pub mod lock;
pub mod provisioner;
pub mod store;
pub mod value;

pub use encoder::{DecodeError, KeyEncoding};
pub use generator::{EntropyError, KeyGenerator, OsKeyGenerator};
pub use lock::StoreLock;
pub use provisioner::{
    EnvSnapshot, ProvisionError, ProvisionOutcome, ProvisionReport, SecretProvisioner, SecretSpec,
    ValueSource,
};
pub use store::{
    is_valid_key, EnvFile, EnvStore, Insert, MalformedEntry, StoreError, ValueStyle,
};
pub use value::{SecretEntry, SecretValue};
