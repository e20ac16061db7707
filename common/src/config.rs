//! Client configuration: a key-value store of preferences.
//!
//! The coordinator owns its store through the [`Store`] trait; the
//! backing can be an ephemeral [`Memory`] map or a JSON [`File`]
//! document on disk.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// A configuration error.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// An error decoding the configuration document.
    #[error("error decoding configuration: {0}")]
    Decoding(#[from] serde_json::Error),
}

/// Represents objects that can store client preferences.
pub trait Store: Send {
    /// Get the value stored under a key.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a value under a key. When `save` is set the change is
    /// flushed to the backing immediately; otherwise it is only marked
    /// dirty and written out with the next flushing write.
    fn set_key(&mut self, key: &str, value: Value, save: bool);

    /// Get a boolean preference.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Get a string preference.
    fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(|s| s.to_owned()))
    }
}

/// Ephemeral configuration store.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    values: HashMap<String, Value>,
}

impl Memory {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<HashMap<String, Value>> for Memory {
    fn from(values: HashMap<String, Value>) -> Self {
        Self { values }
    }
}

impl Store for Memory {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set_key(&mut self, key: &str, value: Value, _save: bool) {
        self.values.insert(key.to_owned(), value);
    }
}

/// Persistent configuration store: a single JSON document on disk.
#[derive(Debug)]
pub struct File {
    path: PathBuf,
    values: HashMap<String, Value>,
}

impl File {
    /// Load the store at the given path, starting empty if the file
    /// does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self { path, values })
    }

    /// Write the document out to disk.
    pub fn flush(&self) -> Result<(), Error> {
        let document = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, document)?;

        Ok(())
    }
}

impl Store for File {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set_key(&mut self, key: &str, value: Value, save: bool) {
        self.values.insert(key.to_owned(), value);

        if save {
            // A failed flush loses the preference, not the session.
            if let Err(err) = self.flush() {
                log::error!(target: "config", "Unable to save {:?}: {}", self.path, err);
            }
        }
    }
}
