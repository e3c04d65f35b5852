use crate::frame::PixelFormat;
use thiserror::Error;

/// Failures of the pure inspection engine (pipeline, difference, classification).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {details}")]
    InvalidInput { details: String },

    #[error("Size mismatch: {left} vs {right}")]
    SizeMismatch { left: String, right: String },

    #[error("Invalid parameter for {step}: {details}")]
    InvalidParameter { step: &'static str, details: String },

    #[error("Unsupported format for {step}: {format:?}")]
    UnsupportedFormat {
        step: &'static str,
        format: PixelFormat,
    },

    #[error("No baseline image configured for camera {camera}")]
    MissingReference { camera: u32 },

    #[error("Invalid configuration: {details}")]
    InvalidConfiguration { details: String },
}

impl EngineError {
    pub fn invalid_input<S: Into<String>>(details: S) -> Self {
        Self::InvalidInput {
            details: details.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(step: &'static str, details: S) -> Self {
        Self::InvalidParameter {
            step,
            details: details.into(),
        }
    }

    pub fn invalid_configuration<S: Into<String>>(details: S) -> Self {
        Self::InvalidConfiguration {
            details: details.into(),
        }
    }
}

/// Errors from the register (fieldbus) collaborator
#[derive(Error, Debug)]
pub enum FieldbusError {
    #[error("Not connected to {address}")]
    NotConnected { address: String },

    #[error("Connection to {address} failed: {details}")]
    Connection { address: String, details: String },

    #[error("Timeout talking to {address}")]
    Timeout { address: String },

    #[error("Device exception: function 0x{function:02X}, code {code}")]
    Exception { function: u8, code: u8 },

    #[error("Malformed response: {details}")]
    Protocol { details: String },

    #[error("Fieldbus IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the event bus
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum InspectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Inspection error: {0}")]
    Engine(#[from] EngineError),

    #[error("Fieldbus error: {0}")]
    Fieldbus(#[from] FieldbusError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl InspectorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InspectorError>;
