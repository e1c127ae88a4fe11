//! Core data types shared by the playback, recording and rewrite engines

use serde::{Deserialize, Serialize};

/// A serialized message taken from, or destined for, a bag.
///
/// The payload is opaque to this crate; only the topic name and timestamp are
/// interpreted. Messages are immutable once created and passed around as
/// `Arc<SerializedMessage>` so the reader thread and the publishing thread can
/// share them without copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    /// Topic name (e.g., "/camera/image_raw")
    pub topic_name: String,
    /// Raw serialized payload
    pub serialized_data: Vec<u8>,
    /// Timestamp in nanoseconds since epoch
    pub time_stamp: i64,
}

impl SerializedMessage {
    pub fn new(topic_name: impl Into<String>, serialized_data: Vec<u8>, time_stamp: i64) -> Self {
        Self {
            topic_name: topic_name.into(),
            serialized_data,
            time_stamp,
        }
    }
}

/// Metadata describing one topic, as persisted in a bag and as registered
/// with a writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    /// Topic name (e.g., "/camera/image_raw")
    pub name: String,
    /// Message type (e.g., "sensor_msgs/msg/Image")
    #[serde(rename = "type")]
    pub message_type: String,
    /// Serialization format (typically "cdr")
    pub serialization_format: String,
    /// QoS profiles offered by the original publishers, as a YAML list
    #[serde(default)]
    pub offered_qos_profiles: String,
}

impl TopicMetadata {
    pub fn new(
        name: impl Into<String>,
        message_type: impl Into<String>,
        serialization_format: impl Into<String>,
        offered_qos_profiles: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message_type: message_type.into(),
            serialization_format: serialization_format.into(),
            offered_qos_profiles: offered_qos_profiles.into(),
        }
    }
}

/// QoS (Quality of Service) profile for a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosProfile {
    /// History policy
    pub history: QosHistory,
    /// Queue depth for KEEP_LAST history
    pub depth: u32,
    /// Reliability policy
    pub reliability: QosReliability,
    /// Durability policy
    pub durability: QosDurability,
    /// Deadline constraint
    pub deadline: QosTime,
    /// Lifespan constraint
    pub lifespan: QosTime,
    /// Liveliness policy
    pub liveliness: QosLiveliness,
    /// Liveliness lease duration
    pub liveliness_lease_duration: QosTime,
    /// Whether to avoid ROS namespace conventions
    pub avoid_ros_namespace_conventions: bool,
}

/// QoS History policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosHistory {
    SystemDefault,
    KeepLast,
    KeepAll,
    Unknown,
}

/// QoS Reliability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosReliability {
    SystemDefault,
    Reliable,
    BestEffort,
    Unknown,
    BestAvailable,
}

/// QoS Durability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosDurability {
    SystemDefault,
    TransientLocal,
    Volatile,
    Unknown,
    BestAvailable,
}

/// QoS Liveliness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLiveliness {
    SystemDefault,
    Automatic,
    ManualByNode,
    ManualByTopic,
    Unknown,
    BestAvailable,
}

/// Time specification for QoS constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QosTime {
    /// Seconds component
    pub sec: i32,
    /// Nanoseconds component
    pub nsec: u32,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            history: QosHistory::SystemDefault,
            depth: 0,
            reliability: QosReliability::SystemDefault,
            durability: QosDurability::SystemDefault,
            deadline: QosTime::default(),
            lifespan: QosTime::default(),
            liveliness: QosLiveliness::SystemDefault,
            liveliness_lease_duration: QosTime::default(),
            avoid_ros_namespace_conventions: false,
        }
    }
}

impl QosProfile {
    /// The profile used when nothing better is known: keep-last history with
    /// a small depth, reliable and volatile delivery.
    pub fn transport_default() -> Self {
        Self {
            history: QosHistory::KeepLast,
            depth: 10,
            reliability: QosReliability::Reliable,
            durability: QosDurability::Volatile,
            ..Self::default()
        }
    }

    /// Reset history to the transport default, keeping the other policies.
    pub fn default_history(mut self) -> Self {
        self.history = QosHistory::KeepLast;
        self.depth = 10;
        self
    }

    pub fn reliability(mut self, reliability: QosReliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn durability(mut self, durability: QosDurability) -> Self {
        self.durability = durability;
        self
    }
}
