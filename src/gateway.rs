//! Authenticated mutation gateway.
//!
//! Create/update/delete calls against the registry, each carrying the
//! session's bearer token, and reconciliation of the locally held device
//! list with the registry's answer. Updates and deletes of listed devices
//! record an explicit [`MutationStatus`]; an add has no listed device until it
//! succeeds, so its outcome is the returned result. Calls are single attempts;
//! retrying is up to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::models::{Device, DevicePatch, NewDevice, ValidationError};
use crate::registry::{RegistryClient, RegistryError};
use crate::session::SharedSession;

// ---

pub type SharedDevices = Arc<Mutex<DeviceList>>;

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("sign in to modify devices")]
    NotSignedIn,

    /// Registry refused or could not be reached. For refusals the message is
    /// the registry's response body.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl MutationError {
    /// Whether the failure was decided locally, before any request was made.
    pub fn is_local(&self) -> bool {
        matches!(self, MutationError::Validation(_) | MutationError::NotSignedIn)
    }
}

/// Outcome of the most recent mutation issued for a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Succeeded,
    Failed(String),
}

/// The dashboard's ordered device list.
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<Device>,
    status: HashMap<String, MutationStatus>,
}

impl DeviceList {
    // ---
    pub fn all(&self) -> Vec<Device> {
        self.devices.clone()
    }

    pub fn get(&self, dev_eui: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.dev_eui == dev_eui)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn status(&self, dev_eui: &str) -> Option<&MutationStatus> {
        self.status.get(dev_eui)
    }

    /// Replace the whole list, e.g. after fetching it from the registry.
    /// Outcomes recorded for devices no longer listed are dropped.
    pub fn replace_all(&mut self, devices: Vec<Device>) {
        // ---
        self.devices = devices;
        let listed: Vec<&str> = self.devices.iter().map(|d| d.dev_eui.as_str()).collect();
        self.status.retain(|id, _| listed.contains(&id.as_str()));
    }

    /// Replace the device with the same EUI in place, or append it.
    fn upsert(&mut self, device: Device) {
        // ---
        if let Err(device) = self.replace_existing(device) {
            self.devices.push(device);
        }
    }

    /// Replace the listed device with the same EUI. Hands the device back
    /// when it is not listed.
    fn replace_existing(&mut self, device: Device) -> Result<(), Device> {
        // ---
        match self.devices.iter_mut().find(|d| d.dev_eui == device.dev_eui) {
            Some(existing) => {
                *existing = device;
                Ok(())
            }
            None => Err(device),
        }
    }

    fn remove(&mut self, dev_eui: &str) -> Option<Device> {
        // ---
        let idx = self.devices.iter().position(|d| d.dev_eui == dev_eui)?;
        Some(self.devices.remove(idx))
    }

    /// Record an outcome for a listed device. Unlisted EUIs are ignored.
    fn set_status(&mut self, dev_eui: &str, status: MutationStatus) {
        // ---
        if self.get(dev_eui).is_some() {
            self.status.insert(dev_eui.to_string(), status);
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutationGateway {
    registry: RegistryClient,
    session: SharedSession,
    devices: SharedDevices,
}

impl MutationGateway {
    // ---
    pub fn new(registry: RegistryClient, session: SharedSession, devices: SharedDevices) -> Self {
        Self {
            registry,
            session,
            devices,
        }
    }

    fn devices(&self) -> MutexGuard<'_, DeviceList> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bearer_token(&self) -> Result<String, MutationError> {
        // ---
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token()
            .map(String::from)
            .ok_or(MutationError::NotSignedIn)
    }

    /// Register a new device. The registry's response is appended to the list.
    ///
    /// The device is not listed until the registry accepts it, so a failed add
    /// leaves the list and the recorded outcomes untouched; the error is the
    /// only outcome.
    pub async fn add_device(&self, payload: &NewDevice) -> Result<Device, MutationError> {
        // ---
        let payload = payload.normalized()?;
        let token = self.bearer_token()?;

        match self.registry.create_device(&token, &payload).await {
            Ok(device) => {
                let mut devices = self.devices();
                devices.upsert(device.clone());
                devices.set_status(&device.dev_eui, MutationStatus::Succeeded);
                info!("Device {} added", device.dev_eui);
                Ok(device)
            }
            Err(e) => {
                error!("Adding device {} failed: {}", payload.dev_eui, e);
                Err(e.into())
            }
        }
    }

    /// Update a device. The patch is applied locally right away and rolled
    /// back if the registry refuses it.
    pub async fn update_device(
        &self,
        dev_eui: &str,
        patch: &DevicePatch,
    ) -> Result<Device, MutationError> {
        // ---
        let token = self.bearer_token()?;

        // (value before the call, value we put in its place)
        let optimistic = {
            let mut devices = self.devices();
            devices.set_status(dev_eui, MutationStatus::Pending);
            devices.get(dev_eui).cloned().map(|before| {
                let mut after = before.clone();
                patch.apply_to(&mut after);
                devices.upsert(after.clone());
                (before, after)
            })
        };

        match self.registry.update_device(&token, dev_eui, patch).await {
            Ok(device) => {
                let mut devices = self.devices();
                if devices.replace_existing(device.clone()).is_err() {
                    debug!("Updated device {} is not listed locally", dev_eui);
                }
                devices.set_status(dev_eui, MutationStatus::Succeeded);
                info!("Device {} updated", dev_eui);
                Ok(device)
            }
            Err(e) => {
                error!("Updating device {} failed: {}", dev_eui, e);
                let mut devices = self.devices();
                if let Some((before, after)) = optimistic {
                    // leave it alone if something newer replaced our optimistic copy
                    if devices.get(dev_eui) == Some(&after) {
                        devices.upsert(before);
                    }
                }
                devices.set_status(dev_eui, MutationStatus::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Delete a device. Returns the removed local entry, if it was listed.
    pub async fn delete_device(&self, dev_eui: &str) -> Result<Option<Device>, MutationError> {
        // ---
        let token = self.bearer_token()?;
        self.devices().set_status(dev_eui, MutationStatus::Pending);

        match self.registry.delete_device(&token, dev_eui).await {
            Ok(()) => {
                let mut devices = self.devices();
                devices.status.remove(dev_eui);
                info!("Device {} deleted", dev_eui);
                Ok(devices.remove(dev_eui))
            }
            Err(e) => {
                error!("Deleting device {} failed: {}", dev_eui, e);
                self.devices()
                    .set_status(dev_eui, MutationStatus::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }
}
