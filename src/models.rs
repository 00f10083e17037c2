//! Data models shared by the dashboard: devices, readings and the payloads
//! exchanged with the device registry.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Lifecycle status of a field device as tracked by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Active,
    Faulty,
    Archived,
}

/// A registered field sensor as returned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    // ---
    pub dev_eui: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_date: Option<NaiveDate>,
}

impl Device {
    // ---
    /// Nickname if one is set, otherwise the EUI.
    pub fn display_name(&self) -> &str {
        // ---
        match self.nickname.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.dev_eui,
        }
    }
}

/// Payload for registering a new device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    // ---
    pub dev_eui: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_date: Option<NaiveDate>,
}

impl NewDevice {
    // ---
    pub fn new(dev_eui: impl Into<String>) -> Self {
        Self {
            dev_eui: dev_eui.into(),
            ..Self::default()
        }
    }

    /// Validate and normalize the payload before it is sent.
    ///
    /// The EUI is trimmed and must be non-empty; an empty nickname falls back
    /// to the EUI and blank notes are dropped.
    pub fn normalized(&self) -> Result<NewDevice, ValidationError> {
        // ---
        let dev_eui = self.dev_eui.trim();
        if dev_eui.is_empty() {
            return Err(ValidationError::EmptyDevEui);
        }

        let nickname = match self.nickname.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => dev_eui.to_string(),
        };

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);

        Ok(NewDevice {
            dev_eui: dev_eui.to_string(),
            nickname: Some(nickname),
            status: self.status,
            latitude: self.latitude,
            longitude: self.longitude,
            notes,
            installation_date: self.installation_date,
        })
    }
}

/// Partial update for an existing device.
///
/// `None` leaves a field untouched. For the nullable coordinates and notes,
/// `Some(None)` clears the value on the registry side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePatch {
    // ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub latitude: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub longitude: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<Option<String>>,
}

/// Keep an explicit `null` as `Some(None)` so it clears the field.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl DevicePatch {
    // ---
    pub fn is_empty(&self) -> bool {
        *self == DevicePatch::default()
    }

    /// Apply the patch to a local copy of the device.
    pub fn apply_to(&self, device: &mut Device) {
        // ---
        if let Some(nickname) = &self.nickname {
            device.nickname = if nickname.trim().is_empty() {
                Some(device.dev_eui.clone())
            } else {
                Some(nickname.clone())
            };
        }
        if let Some(status) = self.status {
            device.status = status;
        }
        if let Some(latitude) = self.latitude {
            device.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            device.longitude = longitude;
        }
        if let Some(notes) = &self.notes {
            device.notes = notes.clone();
        }
    }
}

/// One timestamped moisture sample. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    /// Milliseconds since the Unix epoch, UTC.
    pub timestamp_ms: i64,
    /// Not clamped: out-of-range values are left for the presentation layer.
    pub moisture_pct: f64,
    pub raw_value: Option<i64>,
}

impl Reading {
    pub fn new(timestamp_ms: i64, moisture_pct: f64, raw_value: Option<i64>) -> Self {
        Self {
            timestamp_ms,
            moisture_pct,
            raw_value,
        }
    }
}

/// Most recent live reading seen for a selected device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestSample {
    pub dev_eui: String,
    pub reading: Reading,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("device EUI must not be empty")]
    EmptyDevEui,
}
