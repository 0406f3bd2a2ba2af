pub mod audio;
pub mod config;
pub mod error;
pub mod logger;
pub mod mqtt;
pub mod scene;
pub mod video;

pub use config::RoomConfig;
pub use error::{ControllerError, ControllerResult};

// Re-export logging functionality
pub use logger::{
    create_log_channel, get_logger, init_embedded, init_standalone, set_embedded_mode,
    set_standalone_mode, LogMessage, Logger, Severity,
};
