//! Device registry.
//!
//! Deduplicates discovered devices by address and splits them into bonded
//! and unbonded sets. Entries accumulate until [`DeviceRegistry::reset`].

use indexmap::IndexMap;
use tracing::trace;

use crate::data::DeviceDescriptor;

/// Discovered devices keyed by address, in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: IndexMap<String, DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of descriptors.
    ///
    /// The last report of an address wins for `bonded` and `name`, except
    /// that a missing name never erases a known one. Devices absent from the
    /// batch are kept.
    pub fn merge<I>(&mut self, discovered: I)
    where
        I: IntoIterator<Item = DeviceDescriptor>,
    {
        for device in discovered {
            match self.devices.get_mut(&device.address) {
                Some(existing) => {
                    trace!("Updating device {}", device.address);
                    existing.bonded = device.bonded;
                    if device.name.is_some() {
                        existing.name = device.name;
                    }
                }
                None => {
                    trace!("New device {}", device.address);
                    self.devices.insert(device.address.clone(), device);
                }
            }
        }
    }

    /// Record that a device is now bonded.
    pub fn mark_bonded(&mut self, address: &str) {
        if let Some(device) = self.devices.get_mut(address) {
            device.bonded = true;
        }
    }

    /// Look up a device by address.
    pub fn get(&self, address: &str) -> Option<&DeviceDescriptor> {
        self.devices.get(address)
    }

    /// All devices, in first-seen order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().cloned().collect()
    }

    /// Devices the platform reports as bonded.
    pub fn bonded(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().filter(|d| d.bonded).cloned().collect()
    }

    /// Devices that still need pairing.
    pub fn unbonded(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().filter(|d| !d.bonded).cloned().collect()
    }

    /// Forget every device.
    pub fn reset(&mut self) {
        self.devices.clear();
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device is known.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(address: &str, name: Option<&str>, bonded: bool) -> DeviceDescriptor {
        DeviceDescriptor::new(address, name.map(str::to_string), bonded)
    }

    #[test]
    fn test_duplicate_address_keeps_last_name() {
        let mut registry = DeviceRegistry::new();
        registry.merge([
            device("AA", Some("Sensor-1"), false),
            device("AA", Some("Sensor-Renamed"), false),
        ]);

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("AA").unwrap().name.as_deref(),
            Some("Sensor-Renamed")
        );
    }

    #[test]
    fn test_missing_name_does_not_erase() {
        let mut registry = DeviceRegistry::new();
        registry.merge([device("AA", Some("Sensor"), false)]);
        registry.merge([device("AA", None, false)]);
        assert_eq!(registry.get("AA").unwrap().name.as_deref(), Some("Sensor"));
    }

    #[test]
    fn test_partition_and_preserve_bonded() {
        let mut registry = DeviceRegistry::new();
        registry.merge([device("AA", Some("Paired"), true)]);
        registry.merge([device("BB", Some("New"), false), device("CC", None, false)]);

        assert_eq!(registry.bonded(), vec![device("AA", Some("Paired"), true)]);
        assert_eq!(
            registry.unbonded(),
            vec![device("BB", Some("New"), false), device("CC", None, false)]
        );
        assert_eq!(registry.devices().len(), 3);
    }

    #[test]
    fn test_last_seen_bonded_flag_wins() {
        let mut registry = DeviceRegistry::new();
        registry.merge([device("AA", None, false)]);
        registry.merge([device("AA", None, true)]);
        assert!(registry.get("AA").unwrap().bonded);
    }

    #[test]
    fn test_mark_bonded_and_reset() {
        let mut registry = DeviceRegistry::new();
        registry.merge([device("AA", None, false)]);
        registry.mark_bonded("AA");
        registry.mark_bonded("ZZ");
        assert_eq!(registry.bonded().len(), 1);

        registry.reset();
        assert!(registry.is_empty());
    }
}
