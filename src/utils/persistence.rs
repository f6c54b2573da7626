//! Data persistence utilities.
//!
//! JSON files keyed by name under a data directory. Writes go to a temporary
//! file first and are renamed into place, so readers never observe a
//! half-written file.

use crate::{ResolverError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base directory for data storage
    pub data_dir: PathBuf,
    /// Maximum file size for individual storage files
    pub max_file_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".gdk-resolver"),
            max_file_size: 1024 * 1024, // 1 MB
        }
    }
}

/// JSON file storage manager
#[derive(Debug, Clone)]
pub struct FileStorage {
    config: StorageConfig,
}

impl FileStorage {
    /// Create a new file storage manager
    pub fn new(config: StorageConfig) -> Result<Self> {
        if !config.data_dir.exists() {
            fs::create_dir_all(&config.data_dir)
                .map_err(|e| ResolverError::Persistence(format!("Failed to create data directory: {}", e)))?;
        }

        Ok(Self { config })
    }

    /// Store data to a file
    pub fn store<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let file_path = self.get_file_path(key);
        let serialized = serde_json::to_vec_pretty(data)
            .map_err(|e| ResolverError::Persistence(format!("Serialization failed: {}", e)))?;

        if serialized.len() > self.config.max_file_size {
            return Err(ResolverError::Persistence(format!(
                "Data size {} exceeds maximum file size {}",
                serialized.len(),
                self.config.max_file_size
            )));
        }

        let tmp_path = file_path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)
            .map_err(|e| ResolverError::Persistence(format!("Failed to create file: {}", e)))?;
        file.write_all(&serialized)
            .map_err(|e| ResolverError::Persistence(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .map_err(|e| ResolverError::Persistence(format!("Failed to sync file: {}", e)))?;
        fs::rename(&tmp_path, &file_path)
            .map_err(|e| ResolverError::Persistence(format!("Failed to move file into place: {}", e)))?;

        log::debug!("Stored data to file: {:?}", file_path);
        Ok(())
    }

    /// Load data from a file, `None` if it does not exist
    pub fn load<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        let file_path = self.get_file_path(key);
        if !file_path.exists() {
            return Ok(None);
        }

        let file = File::open(&file_path)
            .map_err(|e| ResolverError::Persistence(format!("Failed to open file: {}", e)))?;
        let data = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ResolverError::Persistence(format!("Deserialization failed: {}", e)))?;

        log::debug!("Loaded data from file: {:?}", file_path);
        Ok(Some(data))
    }

    /// Check if a file exists
    pub fn exists(&self, key: &str) -> bool {
        self.get_file_path(key).exists()
    }

    /// Delete a file
    pub fn delete(&self, key: &str) -> Result<()> {
        let file_path = self.get_file_path(key);

        if file_path.exists() {
            fs::remove_file(&file_path)
                .map_err(|e| ResolverError::Persistence(format!("Failed to delete file: {}", e)))?;
            log::debug!("Deleted file: {:?}", file_path);
        }

        Ok(())
    }

    fn get_file_path(&self, key: &str) -> PathBuf {
        // Sanitize the key to prevent directory traversal
        let sanitized_key = key.replace(['/', '\\', '.'], "_");
        self.config.data_dir.join(format!("{}.json", sanitized_key))
    }
}
