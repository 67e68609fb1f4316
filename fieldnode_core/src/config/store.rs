//! Persistence lifecycle of the node configuration document

use super::record::{ConfigDocument, NodeConfig};
use crate::callbacks::CallbackRegistry;
use crate::error::{NodeError, NodeResult};
use crate::platform::{Clock, Storage};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::rc::Rc;
use std::time::Duration;

/// Location of the node configuration document
pub const CONFIG_PATH: &str = "/config.json";

/// Pause after a write so storage settles before a possible restart
pub const SAVE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Result of [`ConfigStore::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Document parsed; the count of merged fields
    Loaded(usize),
    /// No document yet, defaults kept
    Missing,
    /// Document could not be parsed and was deleted
    Corrupt,
}

/// Access mode for [`ConfigStore::open_config_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::Write => "w",
        }
    }
}

/// Handle on one stored document
pub struct ConfigFile<'a> {
    storage: &'a mut dyn Storage,
    path: String,
    mode: OpenMode,
}

impl<'a> ConfigFile<'a> {
    /// Open `path` on `storage`. Reading a missing document fails with `NotFound`.
    pub fn open(storage: &'a mut dyn Storage, path: &str, mode: OpenMode) -> NodeResult<Self> {
        if mode == OpenMode::Read && !storage.exists(path) {
            debug!("CONFIG: file '{}' mode='{}' not found", path, mode.as_str());
            return Err(NodeError::NotFound(path.to_string()));
        }

        debug!("CONFIG: opening file '{}' mode='{}'", path, mode.as_str());
        Ok(Self {
            storage,
            path: path.to_string(),
            mode,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn read_to_string(&self) -> NodeResult<String> {
        let bytes = self.storage.read(&self.path)?;
        String::from_utf8(bytes)
            .map_err(|e| NodeError::storage(format!("{} is not UTF-8: {}", self.path, e)))
    }

    pub fn read_json<T: DeserializeOwned>(&self) -> NodeResult<T> {
        let bytes = self.storage.read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write_all(&mut self, data: &[u8]) -> NodeResult<()> {
        if self.mode != OpenMode::Write {
            return Err(NodeError::InvalidInput(format!(
                "{} opened read-only",
                self.path
            )));
        }
        self.storage.write(&self.path, data)
    }

    pub fn write_json<T: Serialize>(&mut self, value: &T) -> NodeResult<()> {
        let data = serde_json::to_vec(value)?;
        self.write_all(&data)
    }
}

/// Context handed to save callbacks
pub struct SaveContext<'a> {
    storage: &'a mut dyn Storage,
    config: &'a NodeConfig,
}

impl<'a> SaveContext<'a> {
    pub fn new(storage: &'a mut dyn Storage, config: &'a NodeConfig) -> Self {
        Self { storage, config }
    }

    /// The configuration that was just written
    pub fn config(&self) -> &NodeConfig {
        self.config
    }

    /// Open a feature document next to the node configuration
    pub fn open_config_file(&mut self, path: &str, mode: OpenMode) -> NodeResult<ConfigFile<'_>> {
        ConfigFile::open(&mut *self.storage, path, mode)
    }
}

/// Loads and saves the node configuration document
pub struct ConfigStore {
    storage: Box<dyn Storage>,
    clock: Rc<dyn Clock>,
    path: String,
}

impl ConfigStore {
    pub fn new(storage: Box<dyn Storage>, clock: Rc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            path: CONFIG_PATH.to_string(),
        }
    }

    /// Builder: store the document somewhere else
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Merge the stored document into `config`
    ///
    /// A missing document keeps the defaults. An unparsable one is deleted and
    /// also keeps the defaults; neither case is an error for the caller.
    pub fn load(&mut self, config: &mut NodeConfig) -> LoadOutcome {
        if !self.storage.exists(&self.path) {
            warn!(
                "CONFIG: {} not found, will be created on first config save",
                self.path
            );
            return LoadOutcome::Missing;
        }

        debug!("CONFIG: reading {}", self.path);
        let parsed = self
            .storage
            .read(&self.path)
            .and_then(|bytes| Ok(serde_json::from_slice::<ConfigDocument>(&bytes)?));

        match parsed {
            Ok(document) => {
                match serde_json::to_string(&document.redacted()) {
                    Ok(json) => info!("CONFIG: parsed json: {}", json),
                    Err(e) => debug!("CONFIG: could not render parsed document: {}", e),
                }
                LoadOutcome::Loaded(document.apply_to(config))
            }
            Err(NodeError::NotFound(_)) => {
                error!("CONFIG: file not found {}", self.path);
                LoadOutcome::Missing
            }
            Err(e) => {
                error!("CONFIG: failed to parse {}: {}", self.path, e);
                match self.storage.remove(&self.path) {
                    Ok(()) => info!("CONFIG: removed corrupt file {}", self.path),
                    Err(e) => error!("CONFIG: corrupt file {} could not be removed: {}", self.path, e),
                }
                LoadOutcome::Corrupt
            }
        }
    }

    /// Write every field of `config`, then run the save callbacks in order
    ///
    /// Callbacks only run after a successful write. The settling delay is
    /// applied in both cases.
    pub fn save(&mut self, config: &NodeConfig, registry: &mut CallbackRegistry) -> NodeResult<()> {
        info!("CONFIG: saving config");
        let document = ConfigDocument::from(config);

        let result = serde_json::to_vec(&document)
            .map_err(NodeError::from)
            .and_then(|data| self.storage.write(&self.path, &data));

        match &result {
            Ok(()) => {
                if let Ok(json) = serde_json::to_string(&document.redacted()) {
                    info!("CONFIG: saved json: {}", json);
                }
                let mut ctx = SaveContext::new(&mut *self.storage, config);
                registry.dispatch_saved(&mut ctx);
            }
            Err(e) => error!("CONFIG: failed to write {}: {}", self.path, e),
        }

        self.clock.sleep(SAVE_SETTLE_DELAY);
        result
    }

    /// Open a feature document on the same storage
    pub fn open_config_file(&mut self, path: &str, mode: OpenMode) -> NodeResult<ConfigFile<'_>> {
        ConfigFile::open(&mut *self.storage, path, mode)
    }

    /// Erase all stored documents
    pub fn clear(&mut self) -> NodeResult<()> {
        info!("RESET: formatting storage");
        self.storage.format()
    }
}
