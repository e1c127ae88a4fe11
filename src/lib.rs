//! # rosbags-transport
//!
//! Record, replay and rewrite ROS2 bags over a pluggable publish/subscribe
//! transport.
//!
//! Three engines make up the crate:
//!
//! - [`Player`] streams messages from a bag into the live middleware at a
//!   controllable rate, with pause/resume/seek/step control;
//! - [`Recorder`] discovers live topics, subscribes to them and writes their
//!   messages into a bag;
//! - [`rewrite`] merges multiple input bags into one or more output bags in
//!   strict timestamp order.
//!
//! The bag storage engine and the middleware itself are external
//! collaborators, seen through the [`bag::BagReader`]/[`bag::BagWriter`] and
//! [`node::Node`] contracts. This keeps the engines independent of any
//! particular storage format or RMW implementation and makes them fully
//! testable with in-memory fakes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rosbags_transport::{Player, PlayOptions, StorageOptions};
//! use rosbags_transport::bag::BagReader;
//! use rosbags_transport::node::Node;
//! use std::sync::Arc;
//!
//! fn replay(reader: Box<dyn BagReader>, node: Arc<dyn Node>) -> rosbags_transport::Result<()> {
//!     let options = PlayOptions { rate: 2.0, ..PlayOptions::default() };
//!     let player = Player::new(reader, node, StorageOptions::default(), options)?;
//!     player.play();
//!     Ok(())
//! }
//! ```

pub mod bag;
pub mod clock;
pub mod error;
pub mod node;
pub mod options;
pub mod player;
pub mod qos;
pub mod queue;
pub mod recorder;
pub mod rewrite;
pub mod topic_filter;
pub mod types;

// Re-export main types for convenience
pub use clock::PlayerClock;
pub use error::{Result, TransportError};
pub use options::{ConversionOptions, PlayOptions, RecordOptions, StorageOptions};
pub use player::Player;
pub use queue::MessageQueue;
pub use recorder::Recorder;
pub use rewrite::rewrite;
pub use types::{QosProfile, SerializedMessage, TopicMetadata};
