//! Device records and the registry built from discovery announcements.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use qlp_frame::{Announcement, ChipId};
use serde::{Serialize, Serializer};

/// A known LED controller.
///
/// Two records describe the same device iff their chip ids match. The
/// protocol-level `device_id` may change when the firmware restarts.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    #[serde(serialize_with = "serialize_chip_id")]
    pub chip_id: ChipId,
    /// Protocol id used to correlate command replies.
    pub device_id: String,
    /// Source address of the latest announcement.
    pub address: IpAddr,
    pub name: String,
    /// Last length set by this client; 0 until set.
    pub strip_length: u16,
}

impl Device {
    pub fn new(
        chip_id: ChipId,
        device_id: impl Into<String>,
        address: IpAddr,
        name: impl Into<String>,
    ) -> Self {
        Self {
            chip_id,
            device_id: device_id.into(),
            address,
            name: name.into(),
            strip_length: 0,
        }
    }

    pub fn from_announcement(announcement: Announcement, address: IpAddr) -> Self {
        Self::new(
            announcement.chip_id,
            announcement.device_id,
            address,
            announcement.name,
        )
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.chip_id == other.chip_id
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chip_id.hash(state);
    }
}

fn serialize_chip_id<S: Serializer>(chip_id: &ChipId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(chip_id)
}

/// Outcome of adding a record to the [`Registry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// First record for this chip id.
    Discovered(Device),
    /// An existing record was refreshed. `previous_id` is the device id it
    /// carried before, which differs when the device rebooted.
    Updated { device: Device, previous_id: String },
}

impl Upsert {
    pub fn device(&self) -> &Device {
        match self {
            Upsert::Discovered(device) | Upsert::Updated { device, .. } => device,
        }
    }
}

/// Concurrency-safe set of devices keyed by chip id.
///
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct Registry {
    devices: RwLock<BTreeMap<ChipId, Device>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement. A known chip keeps its strip length and takes
    /// the new device id, address and name.
    pub fn announce(&self, announcement: Announcement, address: IpAddr) -> Upsert {
        let mut devices = self.write();
        match devices.get_mut(&announcement.chip_id) {
            Some(existing) => {
                let previous_id =
                    std::mem::replace(&mut existing.device_id, announcement.device_id);
                existing.address = address;
                existing.name = announcement.name;
                Upsert::Updated {
                    device: existing.clone(),
                    previous_id,
                }
            }
            None => {
                let device = Device::from_announcement(announcement, address);
                devices.insert(device.chip_id, device.clone());
                Upsert::Discovered(device)
            }
        }
    }

    /// Insert or replace a record as given.
    pub fn insert(&self, device: Device) -> Upsert {
        match self.write().insert(device.chip_id, device.clone()) {
            Some(previous) => Upsert::Updated {
                device,
                previous_id: previous.device_id,
            },
            None => Upsert::Discovered(device),
        }
    }

    /// Find a device by its protocol id.
    pub fn lookup(&self, device_id: &str) -> Option<Device> {
        self.read()
            .values()
            .find(|device| device.device_id == device_id)
            .cloned()
    }

    pub fn lookup_chip(&self, chip_id: ChipId) -> Option<Device> {
        self.read().get(&chip_id).cloned()
    }

    /// All devices, ordered by chip id.
    pub fn snapshot(&self) -> Vec<Device> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns false when the chip is not registered.
    pub fn set_strip_length(&self, chip_id: ChipId, length: u16) -> bool {
        match self.write().get_mut(&chip_id) {
            Some(device) => {
                device.strip_length = length;
                true
            }
            None => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ChipId, Device>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ChipId, Device>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}
