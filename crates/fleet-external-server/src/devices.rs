//! Table of currently connected devices.
//!
//! Two devices are the same when module id, device type, role and name all
//! match; priority is mutable metadata and takes no part in identity. The
//! table only ever holds devices of registered modules, which the session
//! controller guarantees by looking the module up before inserting.

use std::collections::HashMap;

use fleet_protocol::Device;

/// Identity of a device, without its priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Module hosting the device.
    pub module_id: u16,
    /// Module-specific device type.
    pub device_type: u32,
    /// Role string.
    pub role: String,
    /// Name string.
    pub name: String,
}

impl DeviceKey {
    /// Builds a key from a wire device. Returns `None` when the module id
    /// does not fit the configured id space (such a module can never be
    /// registered, so the device is from an unknown module).
    #[must_use]
    pub fn from_device(device: &Device) -> Option<Self> {
        let module_id = u16::try_from(device.module).ok()?;
        Some(Self {
            module_id,
            device_type: device.device_type,
            role: device.device_role.clone(),
            name: device.device_name.clone(),
        })
    }

    /// Reconstructs a wire device from the key.
    #[must_use]
    pub fn to_device(&self, priority: u32) -> Device {
        Device {
            module: u32::from(self.module_id),
            device_type: self.device_type,
            device_role: self.role.clone(),
            device_name: self.name.clone(),
            priority,
        }
    }
}

/// Human-readable device identity for log lines.
#[must_use]
pub fn device_repr(device: &Device) -> String {
    format!(
        "{}/{}/{}/{}",
        device.module, device.device_type, device.device_role, device.device_name
    )
}

/// Connected devices of one session, keyed by identity.
#[derive(Debug, Default)]
pub struct DeviceTable {
    entries: HashMap<DeviceKey, u32>,
}

impl DeviceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a device. Returns `true` when the device was new; a repeated
    /// insert only refreshes the priority.
    pub fn insert(&mut self, key: DeviceKey, priority: u32) -> bool {
        self.entries.insert(key, priority).is_none()
    }

    /// Removes a device. Returns its priority when it was present.
    pub fn remove(&mut self, key: &DeviceKey) -> Option<u32> {
        self.entries.remove(key)
    }

    /// Whether the device is currently connected.
    #[must_use]
    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Updates the priority of a connected device.
    pub fn set_priority(&mut self, key: &DeviceKey, priority: u32) {
        if let Some(entry) = self.entries.get_mut(key) {
            *entry = priority;
        }
    }

    /// Number of connected devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no device is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<(DeviceKey, u32)> {
        self.entries.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(role: &str, priority: u32) -> Device {
        Device {
            module: 2,
            device_type: 7,
            device_role: role.to_string(),
            device_name: "A".to_string(),
            priority,
        }
    }

    #[test]
    fn identity_ignores_priority() {
        let a = DeviceKey::from_device(&device("button", 0)).unwrap();
        let b = DeviceKey::from_device(&device("button", 9)).unwrap();
        assert_eq!(a, b);

        let mut table = DeviceTable::new();
        assert!(table.insert(a, 0));
        assert!(!table.insert(b.clone(), 9));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(&b), Some(9));
        assert!(table.is_empty());
    }

    #[test]
    fn oversized_module_id_is_unknown() {
        let mut wire = device("button", 0);
        wire.module = 70_000;
        assert!(DeviceKey::from_device(&wire).is_none());
    }

    #[test]
    fn key_roundtrips_to_device() {
        let wire = device("button", 4);
        let key = DeviceKey::from_device(&wire).unwrap();
        assert_eq!(key.to_device(4), wire);
    }
}
