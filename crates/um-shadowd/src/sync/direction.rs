//! Sync direction policy.

use std::sync::{Arc, RwLock};

use serde::Deserialize;

/// Which arrows of the sync plane are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    BetweenDeviceAndCloud,
    DeviceToCloud,
    CloudToDevice,
}

/// Shared, swappable direction consulted by the gate and workers.
#[derive(Clone)]
pub struct DirectionWrapper {
    inner: Arc<RwLock<SyncDirection>>,
}

impl DirectionWrapper {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            inner: Arc::new(RwLock::new(direction)),
        }
    }

    pub fn get(&self) -> SyncDirection {
        *self.inner.read().unwrap()
    }

    pub fn set(&self, direction: SyncDirection) {
        *self.inner.write().unwrap() = direction;
    }

    pub fn allows_device_to_cloud(&self) -> bool {
        matches!(
            self.get(),
            SyncDirection::BetweenDeviceAndCloud | SyncDirection::DeviceToCloud
        )
    }

    pub fn allows_cloud_to_device(&self) -> bool {
        matches!(
            self.get(),
            SyncDirection::BetweenDeviceAndCloud | SyncDirection::CloudToDevice
        )
    }
}
