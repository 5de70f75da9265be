//! Databases under one root directory
//!
//! Each database is a subdirectory holding a `confdb.json`. Opened databases
//! are cached so every caller shares the same handle (and the same commit
//! lock) for a given name.

use crate::config::ConfDbConfig;
use crate::database::core::{validate_name, ConfigDatabase, META_FILE};
use crate::Result;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct ConfigService {
    root: PathBuf,
    config: ConfDbConfig,
    open: Mutex<AHashMap<String, ConfigDatabase>>,
}

impl ConfigService {
    /// Uses `root` as the parent of all databases, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P, config: ConfDbConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            config,
            open: Mutex::new(AHashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of all databases, sorted.
    pub fn database_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(META_FILE).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn create_database(&self, name: &str) -> Result<ConfigDatabase> {
        validate_name("database", name)?;
        let mut open = self.open.lock();
        let db = ConfigDatabase::create_with_config(self.database_path(name), self.config.clone())?;
        open.insert(name.to_string(), db.clone());
        info!(database = name, "confdb.service.create_database");
        Ok(db)
    }

    /// `None` if no database called `name` exists.
    pub fn open_database(&self, name: &str) -> Result<Option<ConfigDatabase>> {
        validate_name("database", name)?;
        let mut open = self.open.lock();
        if let Some(db) = open.get(name) {
            return Ok(Some(db.clone()));
        }
        let path = self.database_path(name);
        if !path.join(META_FILE).exists() {
            return Ok(None);
        }
        let db = ConfigDatabase::open_with_config(path, self.config.clone())?;
        open.insert(name.to_string(), db.clone());
        Ok(Some(db))
    }

    pub fn ensure_database(&self, name: &str) -> Result<ConfigDatabase> {
        match self.open_database(name)? {
            Some(db) => Ok(db),
            None => self.create_database(name),
        }
    }

    /// Deletes the database directory. Returns false if it did not exist.
    /// Handles still held elsewhere keep working on open files only.
    pub fn drop_database(&self, name: &str) -> Result<bool> {
        validate_name("database", name)?;
        let mut open = self.open.lock();
        open.remove(name);
        let path = self.database_path(name);
        if !path.join(META_FILE).exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&path)?;
        info!(database = name, "confdb.service.drop_database");
        Ok(true)
    }
}
