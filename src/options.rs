//! Configuration bundles for storage, playback and recording

use crate::types::QosProfile;
use std::collections::HashMap;
use std::time::Duration;

/// Options forwarded to the storage layer when opening a bag.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Bag location (directory or file, storage-dependent)
    pub uri: String,
    /// Storage plugin identifier (e.g., "sqlite3", "mcap")
    pub storage_id: String,
    /// Whether the writer buffers in memory until a snapshot is requested
    pub snapshot_mode: bool,
}

/// Input/output serialization formats for a reader or writer.
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    pub input_serialization_format: String,
    pub output_serialization_format: String,
}

/// Options controlling a playback session.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Upper bound of the read-ahead queue, in messages
    pub read_ahead_queue_size: usize,
    /// Initial playback speed multiplier; must be positive
    pub rate: f64,
    /// Only these topics are published; empty means all
    pub topics_to_filter: Vec<String>,
    /// Forced publisher QoS per topic
    pub topic_qos_profile_overrides: HashMap<String, QosProfile>,
    /// Restart from the beginning when the end of the bag is reached
    pub loop_playback: bool,
    /// Remapping arguments forwarded to the middleware untouched
    pub topic_remapping_options: Vec<String>,
    /// Frequency (Hz) for publishing the virtual clock; 0 disables
    pub clock_publish_frequency: f64,
    /// Wait this many nanoseconds before each play (or loop) pass;
    /// negative disables the delay with a warning
    pub delay: i64,
    /// Inhibit the external keyboard binding layer
    pub disable_keyboard_controls: bool,
    /// Key bindings consumed by the external keyboard layer
    pub pause_resume_toggle_key: String,
    pub play_next_key: String,
    pub increase_rate_key: String,
    pub decrease_rate_key: String,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            read_ahead_queue_size: 1000,
            rate: 1.0,
            topics_to_filter: Vec::new(),
            topic_qos_profile_overrides: HashMap::new(),
            loop_playback: false,
            topic_remapping_options: Vec::new(),
            clock_publish_frequency: 0.0,
            delay: 0,
            disable_keyboard_controls: false,
            pause_resume_toggle_key: "SPACE".to_string(),
            play_next_key: "CURSOR_RIGHT".to_string(),
            increase_rate_key: "CURSOR_UP".to_string(),
            decrease_rate_key: "CURSOR_DOWN".to_string(),
        }
    }
}

/// Options controlling a recording session.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Record every discovered topic
    pub all: bool,
    /// Skip the periodic discovery loop entirely
    pub is_discovery_disabled: bool,
    /// Explicit topics to record; empty means "use regex / all selection"
    pub topics: Vec<String>,
    /// Serialization format messages are written in; must be non-empty
    pub rmw_serialization_format: String,
    /// How long the discovery loop sleeps between polls
    pub topic_polling_interval: Duration,
    /// Topics matching this regex are recorded (subject to `all`)
    pub regex: String,
    /// Topics matching this regex are never recorded
    pub exclude: String,
    /// Also consider hidden topics during discovery
    pub include_hidden_topics: bool,
    /// Forced subscription QoS per topic
    pub topic_qos_profile_overrides: HashMap<String, QosProfile>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            all: false,
            is_discovery_disabled: false,
            topics: Vec::new(),
            rmw_serialization_format: String::new(),
            topic_polling_interval: Duration::from_millis(100),
            regex: String::new(),
            exclude: String::new(),
            include_hidden_topics: false,
            topic_qos_profile_overrides: HashMap::new(),
        }
    }
}
