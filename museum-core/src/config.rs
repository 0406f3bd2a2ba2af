//! Room configuration, loaded once at startup from a TOML file.
//!
//! A missing file is a hard startup error; a missing section falls back to
//! the defaults below (mirroring the original controller's
//! `configparser` + `fallback=` pattern).

use crate::error::{ControllerError, ControllerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub retry_attempts: u32,
    pub retry_sleep_secs: f64,
    pub connect_timeout_secs: f64,
    pub check_interval_secs: f64,
    pub feedback_timeout_secs: f64,
    pub device_timeout_secs: f64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            retry_attempts: 5,
            retry_sleep_secs: 2.0,
            connect_timeout_secs: 10.0,
            check_interval_secs: 60.0,
            feedback_timeout_secs: 1.0,
            device_timeout_secs: 180.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSection {
    pub id: String,
    pub default_scene: String,
}

impl Default for RoomSection {
    fn default() -> Self {
        RoomSection {
            id: "room1".to_string(),
            default_scene: "default.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub button_pin: u8,
    pub debounce_ms: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        GpioConfig {
            button_pin: 27,
            debounce_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scenes_dir: String,
    pub audio_dir: String,
    pub videos_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            scenes_dir: "scenes".to_string(),
            audio_dir: "audio".to_string(),
            videos_dir: "videos".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub ipc_socket: String,
    pub idle_image: String,
    pub health_check_interval_secs: f64,
    pub max_restart_attempts: u32,
    pub restart_cooldown_secs: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            ipc_socket: "/tmp/museum-mpv.sock".to_string(),
            idle_image: "idle.png".to_string(),
            health_check_interval_secs: 60.0,
            max_restart_attempts: 3,
            restart_cooldown_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub max_init_attempts: u32,
    pub init_retry_delay_secs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            max_init_attempts: 3,
            init_retry_delay_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub tick_hz: f64,
    pub health_check_interval_secs: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            tick_hz: 10.0,
            health_check_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub mqtt: MqttConfig,
    pub room: RoomSection,
    pub gpio: GpioConfig,
    pub paths: PathsConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub system: SystemConfig,
}

impl RoomConfig {
    /// Loads a room's configuration from a TOML file. A missing or
    /// unparsable file is fatal; missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> ControllerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| ControllerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Builds a default configuration for a given room id, useful for tests
    /// and for writing out a starter file.
    pub fn default_for_room(id: impl Into<String>) -> Self {
        let mut cfg = RoomConfig::default();
        cfg.room.id = id.into();
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let toml_text = r#"
            [room]
            id = "room7"
        "#;
        let cfg: RoomConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.room.id, "room7");
        assert_eq!(cfg.mqtt.broker_port, 1883);
        assert_eq!(cfg.mqtt.device_timeout_secs, 180.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = RoomConfig::load("/nonexistent/path/room.toml");
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.toml");
        let cfg = RoomConfig::default_for_room("room2");
        std::fs::write(&path, toml::to_string(&cfg).unwrap()).unwrap();
        let loaded = RoomConfig::load(&path).unwrap();
        assert_eq!(loaded.room.id, "room2");
    }
}
