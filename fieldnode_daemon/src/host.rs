//! Platform services for running a node on a regular host

use fieldnode_core::error::{NodeError, NodeResult};
use fieldnode_core::platform::{Diagnostics, LinkStatus, NetworkLink, SystemControl};
use fieldnode_core::RestartReason;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

const NETWORK_FILE: &str = "network.json";
const FIRMWARE_FILE: &str = "firmware.bin";

/// Stored network credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// The host's own network connection standing in for a radio link
///
/// Credentials are kept in `network.json` next to the node's documents so
/// they outlive a runtime restart, as a radio driver keeps them in flash.
#[derive(Debug)]
pub struct HostLink {
    path: PathBuf,
    settings: NetworkSettings,
    addr: IpAddr,
    connected: bool,
}

impl HostLink {
    pub fn open(data_dir: &Path, addr: IpAddr) -> NodeResult<Self> {
        let path = data_dir.join(NETWORK_FILE);
        let settings = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        "discarding corrupt network settings: {}",
                        e
                    );
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::error!(
                            path = %path.display(),
                            "corrupt network settings could not be removed: {}",
                            e
                        );
                    }
                    NetworkSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => NetworkSettings::default(),
            Err(e) => return Err(e.into()),
        };

        let addr = if addr.is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            addr
        };

        Ok(Self {
            path,
            settings,
            addr,
            connected: false,
        })
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    fn persist(&self) -> NodeResult<()> {
        let data = serde_json::to_vec_pretty(&self.settings)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl NetworkLink for HostLink {
    fn status(&self) -> LinkStatus {
        if self.connected {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    fn local_addr(&self) -> Option<IpAddr> {
        self.connected.then_some(self.addr)
    }

    fn connect(&mut self, hostname: &str) -> NodeResult<()> {
        tracing::info!(hostname, addr = %self.addr, "host link up");
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn ssid(&self) -> String {
        self.settings.ssid.clone()
    }

    fn configure(&mut self, ssid: &str, password: Option<&str>) -> NodeResult<()> {
        self.settings.ssid = ssid.to_string();
        if let Some(password) = password {
            self.settings.password = password.to_string();
        }
        tracing::info!(ssid, "storing network settings");
        self.persist()
    }

    fn reset_settings(&mut self) -> NodeResult<()> {
        self.settings = NetworkSettings::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Identity, restart and firmware handling for a host build
///
/// A restart only gets logged here; the daemon rebuilds the runtime once
/// `tick` reports it. Uploaded images are written to `firmware.bin`.
#[derive(Debug)]
pub struct HostSystem {
    hardware_id: [u8; 6],
    firmware_path: PathBuf,
}

impl HostSystem {
    pub fn new(hardware_id: [u8; 6], data_dir: &Path) -> Self {
        Self {
            hardware_id,
            firmware_path: data_dir.join(FIRMWARE_FILE),
        }
    }
}

impl SystemControl for HostSystem {
    fn hardware_id(&self) -> [u8; 6] {
        self.hardware_id
    }

    fn restart(&mut self, reason: &RestartReason) {
        tracing::warn!(%reason, "node restart requested");
    }

    fn apply_firmware(&mut self, image: &[u8]) -> NodeResult<()> {
        if image.is_empty() {
            return Err(NodeError::InvalidInput("empty firmware image".to_string()));
        }
        std::fs::write(&self.firmware_path, image)?;
        tracing::info!(
            bytes = image.len(),
            path = %self.firmware_path.display(),
            "firmware image stored"
        );
        Ok(())
    }

    fn diagnostics(&self) -> Diagnostics {
        let image_size = std::env::current_exe()
            .and_then(std::fs::metadata)
            .map(|meta| meta.len())
            .ok();

        Diagnostics {
            sketch_size: image_size,
            ..Diagnostics::default()
        }
    }
}

/// Parse `a0:b1:c2:d3:e4:f5` or `a0b1c2d3e4f5`
pub fn parse_hardware_id(text: &str) -> Option<[u8; 6]> {
    let hex: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.len() != 12 || !hex.is_ascii() {
        return None;
    }

    let mut id = [0u8; 6];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(id)
}

/// Stable pseudo hardware id derived from the host name (FNV-1a)
pub fn derived_hardware_id(hostname: &str) -> [u8; 6] {
    let hash = hostname.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    let bytes = hash.to_be_bytes();
    [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
}
