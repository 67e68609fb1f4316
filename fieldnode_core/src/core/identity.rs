use std::fmt;

/// Name and version reported on the status page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub name: String,
    pub version: String,
}

impl FirmwareInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Configured node name plus the hardware suffix that makes it unique
///
/// The unique name (`{name}_{suffix}`) is the bus client id, the default
/// topic segment and the portal page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    name: String,
    suffix: String,
    unique_name: String,
}

impl NodeIdentity {
    pub fn new(name: &str, hardware_id: [u8; 6]) -> Self {
        let suffix = hardware_suffix(&hardware_id);
        Self {
            name: name.to_string(),
            unique_name: format!("{}_{}", name, suffix),
            suffix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_name)
    }
}

/// Lowercase, zero-padded hex of the hardware id
pub fn hardware_suffix(hardware_id: &[u8]) -> String {
    hardware_id.iter().map(|b| format!("{:02x}", b)).collect()
}
