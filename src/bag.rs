//! Contracts for the external bag storage layer
//!
//! The on-disk format and its storage engine live outside this crate; the
//! engines only depend on the cursor and sink behavior defined here. Readers
//! are not thread-safe and callers serialize access (the player keeps its
//! reader behind a mutex). Writers must accept concurrent `write` calls, as
//! recorder subscription callbacks arrive on transport threads.

use crate::error::Result;
use crate::options::{ConversionOptions, StorageOptions};
use crate::types::{SerializedMessage, TopicMetadata};
use std::sync::Arc;

/// Summary of an open bag, as reported by its metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct BagInfo {
    /// Minimum message timestamp, nanoseconds since epoch
    pub starting_time: i64,
    /// Bag duration in nanoseconds
    pub duration: i64,
    /// Total message count
    pub message_count: u64,
}

/// Topic filter applied to a reader; an empty topic list means no filtering.
#[derive(Debug, Clone, Default)]
pub struct StorageFilter {
    pub topics: Vec<String>,
}

/// An ordered cursor over one bag.
///
/// `read_next` yields messages with strictly increasing timestamps; `seek`
/// repositions the cursor at the first message at or after the given time.
pub trait BagReader: Send {
    /// Open the bag for reading
    fn open(&mut self, storage: &StorageOptions, conversion: &ConversionOptions) -> Result<()>;

    /// Close the bag
    fn close(&mut self) -> Result<()>;

    /// Whether the cursor has more messages
    fn has_next(&mut self) -> bool;

    /// Read the message under the cursor and advance
    fn read_next(&mut self) -> Result<Arc<SerializedMessage>>;

    /// Reposition the cursor at the first message with `time_stamp >= timestamp`
    fn seek(&mut self, timestamp: i64) -> Result<()>;

    /// Summary information from the bag metadata
    fn metadata(&self) -> Result<BagInfo>;

    /// All topics present in the bag
    fn all_topics_and_types(&self) -> Result<Vec<TopicMetadata>>;

    /// Restrict `read_next` to the filtered topics
    fn set_filter(&mut self, filter: StorageFilter) -> Result<()>;
}

/// A sink for serialized messages.
///
/// Implementations must be internally synchronized: `write` and
/// `write_serialized` are called concurrently from many subscription threads.
/// Every topic must be registered with `create_topic` before the first write
/// for it.
pub trait BagWriter: Send + Sync {
    /// Open the bag for writing
    fn open(&self, storage: &StorageOptions, conversion: &ConversionOptions) -> Result<()>;

    /// Flush and close the bag
    fn close(&self) -> Result<()>;

    /// Register a topic; idempotent for an already-known topic
    fn create_topic(&self, topic: &TopicMetadata) -> Result<()>;

    /// Unregister a topic that will never be written
    fn remove_topic(&self, topic: &TopicMetadata) -> Result<()>;

    /// Write one bag message
    fn write(&self, message: Arc<SerializedMessage>) -> Result<()>;

    /// Write a raw payload received from the transport, stamped with the
    /// given wall-clock time
    fn write_serialized(
        &self,
        data: &[u8],
        topic_name: &str,
        type_name: &str,
        wall_time: i64,
    ) -> Result<()>;

    /// In snapshot mode, persist the buffered window; returns whether a
    /// snapshot was taken
    fn take_snapshot(&self) -> bool;
}

/// A shared writer is itself a writer, so one bag can be fed by an engine
/// while another handle inspects it (e.g., the snapshot service layer).
impl<W: BagWriter + ?Sized> BagWriter for Arc<W> {
    fn open(&self, storage: &StorageOptions, conversion: &ConversionOptions) -> Result<()> {
        (**self).open(storage, conversion)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn create_topic(&self, topic: &TopicMetadata) -> Result<()> {
        (**self).create_topic(topic)
    }

    fn remove_topic(&self, topic: &TopicMetadata) -> Result<()> {
        (**self).remove_topic(topic)
    }

    fn write(&self, message: Arc<SerializedMessage>) -> Result<()> {
        (**self).write(message)
    }

    fn write_serialized(
        &self,
        data: &[u8],
        topic_name: &str,
        type_name: &str,
        wall_time: i64,
    ) -> Result<()> {
        (**self).write_serialized(data, topic_name, type_name, wall_time)
    }

    fn take_snapshot(&self) -> bool {
        (**self).take_snapshot()
    }
}
