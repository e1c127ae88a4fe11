//! Contracts for the external publish/subscribe middleware
//!
//! The transport itself (RPC, discovery wire protocol, delivery) is an
//! external collaborator. The engines see it through the `Node` trait: enough
//! to create generic publishers and subscriptions, inspect the live topic
//! graph, and observe process liveness.

use crate::error::Result;
use crate::types::QosProfile;

/// Callback invoked by the transport for every message a subscription
/// delivers. Runs on transport threads; one logical invocation per message.
pub type SubscriptionCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// A publisher endpoint for one topic, created via [`Node::create_publisher`].
pub trait Publisher: Send + Sync {
    /// Publish one serialized payload
    fn publish(&self, data: &[u8]) -> Result<()>;
}

/// A subscription for one topic; dropping it tears the subscription down and
/// stops callback delivery.
pub trait Subscription: Send {
    /// The QoS the transport actually granted for this subscription
    fn actual_qos(&self) -> QosProfile;
}

/// QoS information about one live publisher endpoint on a topic.
#[derive(Debug, Clone)]
pub struct PublisherInfo {
    pub qos: QosProfile,
}

/// Handle to the middleware node hosting the player or recorder.
pub trait Node: Send + Sync {
    /// Process liveness; loops exit when this turns false
    fn ok(&self) -> bool;

    /// The serialization format this middleware speaks natively
    fn serialization_format(&self) -> String;

    /// Create a type-erased publisher. Fails for unknown message types.
    fn create_publisher(
        &self,
        topic_name: &str,
        type_name: &str,
        qos: QosProfile,
    ) -> Result<Box<dyn Publisher>>;

    /// Create a type-erased subscription delivering payloads to `callback`.
    /// Fails for unknown message types.
    fn create_subscription(
        &self,
        topic_name: &str,
        type_name: &str,
        qos: QosProfile,
        callback: SubscriptionCallback,
    ) -> Result<Box<dyn Subscription>>;

    /// All currently advertised topics with the types offered on each
    fn topic_names_and_types(&self) -> Vec<(String, Vec<String>)>;

    /// QoS information for every live publisher on a topic
    fn publishers_info_for_topic(&self, topic_name: &str) -> Vec<PublisherInfo>;

    /// Whether type support for the given message type can be loaded
    fn is_type_supported(&self, type_name: &str) -> bool;

    /// Expand a relative topic name against this node's namespace
    fn expand_topic_name(&self, topic_name: &str) -> String;
}
