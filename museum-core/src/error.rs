//! Domain error type. Scene loading, validation, and media dispatch return
//! `Result<_, ControllerError>` so a single bad action never unwinds the
//! scene runner; only startup-configuration failures are meant to escape
//! past `main` as `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("scene '{scene}' failed schema validation: {reason}")]
    SceneSchema { scene: String, reason: String },

    #[error("scene '{scene}' has a dangling reference: {reason}")]
    SceneReferential { scene: String, reason: String },

    #[error("scene already running, ignoring request to start '{0}'")]
    SceneBusy(String),

    #[error("mqtt error: {0}")]
    Mqtt(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("video error: {0}")]
    Video(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
