//! Discovered device descriptors.

/// A device seen during discovery or in the bonded list.
///
/// Identity is the address; the name may be missing or change between passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    /// Stable, unique address.
    pub address: String,
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Whether the platform reports the device as bonded.
    pub bonded: bool,
}

impl DeviceDescriptor {
    /// Create a descriptor.
    pub fn new(address: impl Into<String>, name: Option<String>, bonded: bool) -> Self {
        Self {
            address: address.into(),
            name,
            bonded,
        }
    }

    /// Name for display, falling back to a placeholder.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let named = DeviceDescriptor::new("00:11:22:33:44:55", Some("HC-05".to_string()), true);
        assert_eq!(named.to_string(), "HC-05 (00:11:22:33:44:55)");

        let unnamed = DeviceDescriptor::new("AA:BB", None, false);
        assert_eq!(unnamed.display_name(), "Unknown Device");
    }
}
