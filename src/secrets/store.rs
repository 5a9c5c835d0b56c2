//! `.env`-style key/value store.
//!
//! One `KEY=VALUE` pair per line. Every write is a full read-merge-write:
//! the file is loaded, the target key upserted, and the whole file replaced
//! atomically (temp file in the same directory, then rename). Writers are
//! serialised across processes by [`StoreLock`].
//!
//! Values of keys that are not being modified are carried through a rewrite
//! byte-for-byte, as are comments, blank lines and lines that fail to parse.

use super::lock::StoreLock;
use crate::config::StoreConfig;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {waited:?} waiting for store lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Invalid entry for key '{key}': {reason}")]
    InvalidEntry { key: String, reason: &'static str },
}

/// A store line that could not be parsed. Skipped on read, kept verbatim on
/// rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed store entry on line {line_number}: {reason}")]
pub struct MalformedEntry {
    pub line_number: usize,
    pub reason: &'static str,
}

/// How a value is written to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueStyle {
    #[default]
    Bare,
    /// Wrapped in double quotes.
    Quoted,
}

/// Result of [`EnvStore::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    /// The key already held this value; nothing was written.
    Existing(String),
    /// The offered value was persisted.
    Inserted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry {
        key: String,
        raw: String,
        exported: bool,
    },
    Verbatim(String),
}

/// Parsed contents of a store file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<Line>,
}

impl EnvFile {
    /// Parse file contents. Malformed lines are reported but never fatal.
    ///
    /// A key that appears more than once keeps the position of its first
    /// occurrence and the value of its last.
    pub fn parse(content: &str) -> (Self, Vec<MalformedEntry>) {
        let mut file = Self::default();
        let mut malformed = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                file.lines.push(Line::Verbatim(line.to_string()));
                continue;
            }

            let Some((key_part, raw)) = line.split_once('=') else {
                malformed.push(MalformedEntry {
                    line_number: index + 1,
                    reason: "missing '=' separator",
                });
                file.lines.push(Line::Verbatim(line.to_string()));
                continue;
            };

            let key_part = key_part.trim();
            let (key, exported) = match key_part.strip_prefix("export ") {
                Some(rest) => (rest.trim(), true),
                None => (key_part, false),
            };
            if key.is_empty() || key.contains(char::is_whitespace) {
                malformed.push(MalformedEntry {
                    line_number: index + 1,
                    reason: "invalid key",
                });
                file.lines.push(Line::Verbatim(line.to_string()));
                continue;
            }

            match file.entry_mut(key) {
                Some(Line::Entry {
                    raw: existing,
                    exported: was_exported,
                    ..
                }) => {
                    *existing = raw.to_string();
                    *was_exported = exported;
                }
                _ => file.lines.push(Line::Entry {
                    key: key.to_string(),
                    raw: raw.to_string(),
                    exported,
                }),
            }
        }

        (file, malformed)
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut Line> {
        self.lines
            .iter_mut()
            .find(|line| matches!(line, Line::Entry { key: k, .. } if k == key))
    }

    /// Value of `key` with surrounding whitespace and quotes removed.
    /// An empty value reads as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw(key).map(unquote).filter(|v| !v.is_empty())
    }

    /// Value of `key` exactly as written after the `=`.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, raw, .. } if k == key => Some(raw.as_str()),
            _ => None,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, .. } => Some(key.as_str()),
            Line::Verbatim(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a single key. Existing keys keep their position,
    /// new keys are appended.
    pub fn upsert(&mut self, key: &str, value: &str, style: ValueStyle) -> Result<(), StoreError> {
        validate_entry(key, value)?;
        let raw = match style {
            ValueStyle::Bare => value.to_string(),
            ValueStyle::Quoted => format!("\"{}\"", value),
        };
        match self.entry_mut(key) {
            Some(Line::Entry { raw: existing, .. }) => *existing = raw,
            _ => self.lines.push(Line::Entry {
                key: key.to_string(),
                raw,
                exported: false,
            }),
        }
        Ok(())
    }

    /// Render the full file contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, raw, exported } => {
                    if *exported {
                        out.push_str("export ");
                    }
                    out.push_str(key);
                    out.push('=');
                    out.push_str(raw);
                }
                Line::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }
}

fn unquote(raw: &str) -> &str {
    let value = raw.trim();
    for quote in ['"', '\''] {
        let Some(rest) = value.strip_prefix(quote) else {
            continue;
        };
        if let Some(end) = rest.find(quote) {
            let tail = rest[end + 1..].trim_start();
            if tail.is_empty() || tail.starts_with('#') {
                return &rest[..end];
            }
        }
    }
    // Unquoted values may carry a trailing ` # comment`.
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

/// Whether `key` can be written as a store key: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn validate_entry(key: &str, value: &str) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if !is_valid_key(key) {
        Some("key must be letters, digits and '_', not starting with a digit")
    } else if value.contains(['\n', '\r']) {
        Some("value contains a line break")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidEntry {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

/// File-backed key/value store.
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.path).with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole file. A missing file is an empty store.
    pub fn load(&self) -> Result<EnvFile, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(EnvFile::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let (file, malformed) = EnvFile::parse(&content);
        for entry in &malformed {
            warn!(path = %self.path.display(), line = entry.line_number, reason = entry.reason, "Skipping malformed store entry");
        }
        Ok(file)
    }

    /// Read a single value. `None` when the file or key is missing or the
    /// value is empty.
    pub fn read_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.get(key).map(str::to_string))
    }

    /// Upsert one key, preserving every other entry.
    pub fn write_value(&self, key: &str, value: &str, style: ValueStyle) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut file = self.load()?;
        file.upsert(key, value, style)?;
        self.save(&file)?;
        info!(path = %self.path.display(), key, "Store entry written");
        Ok(())
    }

    /// Persist `value` under `key` only if the key has no value yet.
    ///
    /// The check happens under the store lock against a fresh read, so a
    /// value written by another process in the meantime is returned instead
    /// of being overwritten.
    pub fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        style: ValueStyle,
    ) -> Result<Insert, StoreError> {
        let _lock = self.lock()?;
        let mut file = self.load()?;
        if let Some(existing) = file.get(key) {
            debug!(path = %self.path.display(), key, "Key appeared before write, keeping it");
            return Ok(Insert::Existing(existing.to_string()));
        }
        file.upsert(key, value, style)?;
        self.save(&file)?;
        info!(path = %self.path.display(), key, "Store entry written");
        Ok(Insert::Inserted)
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        StoreLock::acquire(&self.path, self.lock_timeout)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Atomically replace the file with `file`'s contents.
    fn save(&self, file: &EnvFile) -> Result<(), StoreError> {
        let dir = self.dir();
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
        tmp.write_all(file.render().as_bytes())
            .map_err(io_error(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_error(tmp.path()))?;

        // Temp files are created 0600; keep whatever mode the target had.
        match fs::metadata(&self.path) {
            Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions())
                .map_err(io_error(tmp.path()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        tmp.persist(&self.path).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}
