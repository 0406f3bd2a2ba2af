//! Presence tracking for room devices published on `devices/+/status`.
//! A retained `online` seen at subscription time is ignored; only live
//! updates flip a device's state, and a device that stops refreshing
//! within the configured timeout is forced back offline.

use crate::{log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "online" => Some(DeviceStatus::Online),
            "offline" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub status: DeviceStatus,
    pub last_updated: DateTime<Utc>,
}

pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    device_timeout: chrono::Duration,
}

impl DeviceRegistry {
    pub fn new(device_timeout_secs: f64) -> Self {
        DeviceRegistry {
            devices: Mutex::new(HashMap::new()),
            device_timeout: chrono::Duration::milliseconds(
                (device_timeout_secs.max(0.0) * 1000.0) as i64,
            ),
        }
    }

    /// Updates a device's status. `is_retained` marks a message delivered
    /// because of the broker's retained flag rather than a live publish.
    pub fn update_device_status(&self, device_id: &str, status_raw: &str, is_retained: bool) {
        let Some(status) = DeviceStatus::parse(status_raw) else {
            log_warn!("Unrecognized device status '{status_raw}' for {device_id}");
            return;
        };
        let now = Utc::now();
        let mut devices = self.devices.lock().unwrap();

        if is_retained && status == DeviceStatus::Online {
            log_debug!("Ignoring stale retained 'online' status for {device_id}");
            devices.entry(device_id.to_string()).or_insert(DeviceRecord {
                status: DeviceStatus::Offline,
                last_updated: now,
            });
            return;
        }

        let previous = devices.get(device_id).map(|r| r.status);
        match (previous, status) {
            (None, DeviceStatus::Online) | (Some(DeviceStatus::Offline), DeviceStatus::Online) => {
                log_warn!("Device {device_id} connected");
            }
            (Some(DeviceStatus::Online), DeviceStatus::Offline) => {
                log_warn!("Device {device_id} disconnected");
            }
            _ => {}
        }

        devices.insert(
            device_id.to_string(),
            DeviceRecord {
                status,
                last_updated: now,
            },
        );
        log_debug!("Device {device_id} status: {status_raw}");
    }

    /// Forces any device that hasn't refreshed within the timeout back
    /// offline. Called before every read so staleness is never observed
    /// stale by more than one read interval.
    pub fn cleanup_stale_devices(&self) {
        let now = Utc::now();
        let mut devices = self.devices.lock().unwrap();
        let stale: Vec<String> = devices
            .iter()
            .filter(|(_, info)| {
                info.status == DeviceStatus::Online && now - info.last_updated > self.device_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        for device_id in stale {
            log_warn!(
                "Device {device_id} timeout - marking as offline (last seen {}s ago)",
                self.device_timeout.num_seconds()
            );
            if let Some(record) = devices.get_mut(&device_id) {
                record.status = DeviceStatus::Offline;
                record.last_updated = now;
            }
        }
    }

    pub fn get_connected_devices(&self) -> HashMap<String, DeviceRecord> {
        self.cleanup_stale_devices();
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, info)| info.status == DeviceStatus::Online)
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }

    pub fn get_all_devices(&self) -> HashMap<String, DeviceRecord> {
        self.cleanup_stale_devices();
        self.devices.lock().unwrap().clone()
    }

    pub fn clear_devices(&self) {
        self.devices.lock().unwrap().clear();
        log_info!("Device registry cleared");
    }

    pub fn status_summary(&self) -> (usize, usize, usize) {
        self.cleanup_stale_devices();
        let devices = self.devices.lock().unwrap();
        let online = devices
            .values()
            .filter(|info| info.status == DeviceStatus::Online)
            .count();
        let offline = devices.len() - online;
        (devices.len(), online, offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_online_is_ignored_but_registers_offline() {
        let registry = DeviceRegistry::new(180.0);
        registry.update_device_status("esp32_07", "online", true);
        let all = registry.get_all_devices();
        assert_eq!(all["esp32_07"].status, DeviceStatus::Offline);
        assert_eq!(registry.get_connected_devices().len(), 0);
    }

    #[test]
    fn live_online_registers_the_device() {
        let registry = DeviceRegistry::new(180.0);
        registry.update_device_status("esp32_07", "online", false);
        assert_eq!(registry.get_connected_devices().len(), 1);
    }

    #[test]
    fn transition_to_offline_removes_from_connected() {
        let registry = DeviceRegistry::new(180.0);
        registry.update_device_status("esp32_07", "online", false);
        registry.update_device_status("esp32_07", "offline", false);
        assert_eq!(registry.get_connected_devices().len(), 0);
    }

    #[test]
    fn staleness_forces_offline() {
        let registry = DeviceRegistry::new(0.0);
        registry.update_device_status("esp32_07", "online", false);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(registry.get_connected_devices().len(), 0);
    }

    #[test]
    fn clear_devices_empties_registry() {
        let registry = DeviceRegistry::new(180.0);
        registry.update_device_status("esp32_07", "online", false);
        registry.clear_devices();
        assert_eq!(registry.get_all_devices().len(), 0);
    }

    #[test]
    fn status_summary_counts_correctly() {
        let registry = DeviceRegistry::new(180.0);
        registry.update_device_status("a", "online", false);
        registry.update_device_status("b", "offline", false);
        assert_eq!(registry.status_summary(), (2, 1, 1));
    }
}
