//! Error types for rosbags-transport

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while playing, recording or rewriting bags
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error when accessing files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing or emitting YAML (QoS profiles, topic metadata)
    #[error("Failed to process YAML: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// Invalid configuration option
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Storage-layer error surfaced from a bag reader or writer
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Publisher or subscription could not be created for a topic
    #[error("Failed to set up topic '{topic}': {reason}")]
    TopicSetup { topic: String, reason: String },

    /// Generic error with custom message
    #[error("Transport error: {message}")]
    Generic { message: String },
}

impl TransportError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a topic setup error
    pub fn topic_setup(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TopicSetup {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a new generic error with a custom message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}
