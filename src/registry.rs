//! Process-wide directory of open containers. The name->Container map is a
//! concurrent-safe `RwLock<HashMap<...>>`: read-locked for lookups,
//! write-locked only for insert/remove, so operations on distinct
//! containers never contend with each other at the registry level.

use crate::block_device::FileBlockDevice;
use crate::container::{Container, ContainerError};
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<String, Arc<Container<FileBlockDevice>>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        name: &str,
        path: &Path,
        total_blocks: u64,
        block_size: u64,
    ) -> Result<Arc<Container<FileBlockDevice>>, RegistryError> {
        {
            let containers = self.containers.read().unwrap();
            if containers.contains_key(name) {
                return Err(RegistryError::ContainerAlreadyExists(name.to_string()));
            }
        }
        let container = Arc::new(Container::create(path, total_blocks, block_size)?);
        let mut containers = self.containers.write().unwrap();
        containers.insert(name.to_string(), container.clone());
        info!("registered container '{name}' at {}", path.display());
        Ok(container)
    }

    pub fn open(&self, name: &str, path: &Path) -> Result<Arc<Container<FileBlockDevice>>, RegistryError> {
        {
            let containers = self.containers.read().unwrap();
            if containers.contains_key(name) {
                return Err(RegistryError::ContainerAlreadyExists(name.to_string()));
            }
        }
        let container = Arc::new(Container::open(path)?);
        let mut containers = self.containers.write().unwrap();
        containers.insert(name.to_string(), container.clone());
        info!("opened container '{name}' at {}", path.display());
        Ok(container)
    }

    /// Removes the registry entry. Does not delete the host file; that
    /// remains the caller's responsibility.
    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let mut containers = self.containers.write().unwrap();
        containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::ContainerNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Arc<Container<FileBlockDevice>>, RegistryError> {
        let containers = self.containers.read().unwrap();
        containers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ContainerNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        self.containers.read().unwrap().keys().cloned().collect()
    }
}
