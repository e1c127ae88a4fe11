//! In-memory fakes for the storage layer and the middleware
//!
//! `MemoryReader` and `MemoryWriter` stand in for the external bag storage;
//! `TestNode` stands in for the middleware, recording everything published
//! and letting tests deliver messages into subscriptions by hand. The writer
//! rejects writes for unregistered topics, so the create-topic-before-write
//! invariant is checked by construction in every recorder test.

#![allow(dead_code)]

use parking_lot::Mutex;
use rosbags_transport::bag::{BagInfo, BagReader, BagWriter, StorageFilter};
use rosbags_transport::error::{Result, TransportError};
use rosbags_transport::node::{
    Node, Publisher, PublisherInfo, Subscription, SubscriptionCallback,
};
use rosbags_transport::options::{ConversionOptions, StorageOptions};
use rosbags_transport::types::{QosProfile, SerializedMessage, TopicMetadata};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub const MS: i64 = 1_000_000;

/// A message whose payload encodes its own timestamp, so tests can identify
/// published messages without extra bookkeeping.
pub fn stamped_message(topic: &str, time_stamp: i64) -> Arc<SerializedMessage> {
    Arc::new(SerializedMessage::new(
        topic,
        time_stamp.to_le_bytes().to_vec(),
        time_stamp,
    ))
}

pub fn decode_stamp(data: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    i64::from_le_bytes(bytes)
}

pub fn topic(name: &str, type_name: &str) -> TopicMetadata {
    TopicMetadata::new(name, type_name, "cdr", "")
}

// ---------------------------------------------------------------------------
// Storage fakes

/// Bag reader over a fixed, timestamp-sorted message list.
pub struct MemoryReader {
    topics: Vec<TopicMetadata>,
    messages: Vec<Arc<SerializedMessage>>,
    cursor: usize,
    filter: Vec<String>,
    is_open: bool,
}

impl MemoryReader {
    pub fn new(topics: Vec<TopicMetadata>, messages: Vec<Arc<SerializedMessage>>) -> Self {
        Self {
            topics,
            messages,
            cursor: 0,
            filter: Vec::new(),
            is_open: false,
        }
    }

    pub fn boxed(
        topics: Vec<TopicMetadata>,
        messages: Vec<Arc<SerializedMessage>>,
    ) -> Box<dyn BagReader> {
        Box::new(Self::new(topics, messages))
    }

    fn next_index(&self) -> Option<usize> {
        (self.cursor..self.messages.len()).find(|&i| {
            self.filter.is_empty() || self.filter.contains(&self.messages[i].topic_name)
        })
    }
}

impl BagReader for MemoryReader {
    fn open(&mut self, _storage: &StorageOptions, _conversion: &ConversionOptions) -> Result<()> {
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.is_open = false;
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        self.next_index().is_some()
    }

    fn read_next(&mut self) -> Result<Arc<SerializedMessage>> {
        let index = self
            .next_index()
            .ok_or_else(|| TransportError::storage("read past the end of the bag"))?;
        self.cursor = index + 1;
        Ok(Arc::clone(&self.messages[index]))
    }

    fn seek(&mut self, timestamp: i64) -> Result<()> {
        self.cursor = self
            .messages
            .iter()
            .position(|m| m.time_stamp >= timestamp)
            .unwrap_or(self.messages.len());
        Ok(())
    }

    fn metadata(&self) -> Result<BagInfo> {
        let starting_time = self.messages.first().map_or(0, |m| m.time_stamp);
        let end_time = self.messages.last().map_or(0, |m| m.time_stamp);
        Ok(BagInfo {
            starting_time,
            duration: end_time - starting_time,
            message_count: self.messages.len() as u64,
        })
    }

    fn all_topics_and_types(&self) -> Result<Vec<TopicMetadata>> {
        Ok(self.topics.clone())
    }

    fn set_filter(&mut self, filter: StorageFilter) -> Result<()> {
        self.filter = filter.topics;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WrittenMessage {
    pub topic_name: String,
    pub data: Vec<u8>,
    pub time_stamp: i64,
}

#[derive(Default)]
pub struct WriterState {
    pub is_open: bool,
    pub topics: Vec<TopicMetadata>,
    pub removed_topics: Vec<String>,
    pub written: Vec<WrittenMessage>,
    pub snapshots_taken: usize,
}

/// Bag writer collecting everything in memory. Internally synchronized, as
/// the writer contract requires; writes for unregistered topics fail.
#[derive(Default)]
pub struct MemoryWriter {
    pub state: Mutex<WriterState>,
}

impl MemoryWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written(&self) -> Vec<WrittenMessage> {
        self.state.lock().written.clone()
    }

    pub fn created_topics(&self) -> Vec<String> {
        self.state.lock().topics.iter().map(|t| t.name.clone()).collect()
    }
}

impl BagWriter for MemoryWriter {
    fn open(&self, _storage: &StorageOptions, _conversion: &ConversionOptions) -> Result<()> {
        self.state.lock().is_open = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.state.lock().is_open = false;
        Ok(())
    }

    fn create_topic(&self, topic: &TopicMetadata) -> Result<()> {
        let mut state = self.state.lock();
        if !state.topics.iter().any(|t| t.name == topic.name) {
            state.topics.push(topic.clone());
        }
        Ok(())
    }

    fn remove_topic(&self, topic: &TopicMetadata) -> Result<()> {
        let mut state = self.state.lock();
        state.topics.retain(|t| t.name != topic.name);
        state.removed_topics.push(topic.name.clone());
        Ok(())
    }

    fn write(&self, message: Arc<SerializedMessage>) -> Result<()> {
        self.write_serialized(
            &message.serialized_data,
            &message.topic_name,
            "",
            message.time_stamp,
        )
    }

    fn write_serialized(
        &self,
        data: &[u8],
        topic_name: &str,
        _type_name: &str,
        wall_time: i64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.topics.iter().any(|t| t.name == topic_name) {
            return Err(TransportError::storage(format!(
                "write for unregistered topic '{topic_name}'"
            )));
        }
        state.written.push(WrittenMessage {
            topic_name: topic_name.to_string(),
            data: data.to_vec(),
            time_stamp: wall_time,
        });
        Ok(())
    }

    fn take_snapshot(&self) -> bool {
        self.state.lock().snapshots_taken += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Middleware fake

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic_name: String,
    pub data: Vec<u8>,
    pub at: Instant,
}

struct SubscriptionEntry {
    callback: SubscriptionCallback,
    qos: QosProfile,
    active: AtomicBool,
}

/// Fake middleware node. Publishers append to a shared log; subscriptions
/// are invoked through [`TestNode::deliver`].
pub struct TestNode {
    ok: AtomicBool,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    graph: Mutex<Vec<(String, Vec<String>)>>,
    publisher_infos: Mutex<HashMap<String, Vec<PublisherInfo>>>,
    unsupported_types: Mutex<HashSet<String>>,
    failing_publisher_topics: Mutex<HashSet<String>>,
    failing_subscription_topics: Mutex<HashSet<String>>,
    subscription_entries: Mutex<HashMap<String, Arc<SubscriptionEntry>>>,
}

impl TestNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ok: AtomicBool::new(true),
            published: Arc::new(Mutex::new(Vec::new())),
            graph: Mutex::new(Vec::new()),
            publisher_infos: Mutex::new(HashMap::new()),
            unsupported_types: Mutex::new(HashSet::new()),
            failing_publisher_topics: Mutex::new(HashSet::new()),
            failing_subscription_topics: Mutex::new(HashSet::new()),
            subscription_entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_ok(&self, ok: bool) {
        self.ok.store(ok, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic_name: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic_name == topic_name)
            .cloned()
            .collect()
    }

    /// Advertise a topic in the graph with one default (reliable, volatile)
    /// publisher endpoint.
    pub fn add_topic(&self, name: &str, type_name: &str) {
        self.graph
            .lock()
            .push((name.to_string(), vec![type_name.to_string()]));
        self.publisher_infos.lock().insert(
            name.to_string(),
            vec![PublisherInfo {
                qos: QosProfile::transport_default(),
            }],
        );
    }

    pub fn add_topic_with_types(&self, name: &str, types: &[&str]) {
        self.graph.lock().push((
            name.to_string(),
            types.iter().map(|t| t.to_string()).collect(),
        ));
    }

    pub fn set_publisher_infos(&self, name: &str, infos: Vec<PublisherInfo>) {
        self.publisher_infos
            .lock()
            .insert(name.to_string(), infos);
    }

    pub fn mark_type_unsupported(&self, type_name: &str) {
        self.unsupported_types.lock().insert(type_name.to_string());
    }

    pub fn fail_publisher_creation_for(&self, topic_name: &str) {
        self.failing_publisher_topics
            .lock()
            .insert(topic_name.to_string());
    }

    pub fn fail_subscription_creation_for(&self, topic_name: &str) {
        self.failing_subscription_topics
            .lock()
            .insert(topic_name.to_string());
    }

    /// Invoke the live subscription callback for `topic_name`, as the
    /// transport would on message arrival. Returns whether one was invoked.
    pub fn deliver(&self, topic_name: &str, data: Vec<u8>) -> bool {
        let entry = self.subscription_entries.lock().get(topic_name).cloned();
        match entry {
            Some(entry) if entry.active.load(Ordering::SeqCst) => {
                (entry.callback)(data);
                true
            }
            _ => false,
        }
    }

    pub fn has_active_subscription(&self, topic_name: &str) -> bool {
        self.subscription_entries
            .lock()
            .get(topic_name)
            .is_some_and(|e| e.active.load(Ordering::SeqCst))
    }
}

impl Node for TestNode {
    fn ok(&self) -> bool {
        self.ok.load(Ordering::SeqCst)
    }

    fn serialization_format(&self) -> String {
        "cdr".to_string()
    }

    fn create_publisher(
        &self,
        topic_name: &str,
        type_name: &str,
        _qos: QosProfile,
    ) -> Result<Box<dyn Publisher>> {
        if self.failing_publisher_topics.lock().contains(topic_name) {
            return Err(TransportError::topic_setup(
                topic_name,
                format!("no type support for '{type_name}'"),
            ));
        }
        Ok(Box::new(TestPublisher {
            topic_name: topic_name.to_string(),
            published: Arc::clone(&self.published),
        }))
    }

    fn create_subscription(
        &self,
        topic_name: &str,
        type_name: &str,
        qos: QosProfile,
        callback: SubscriptionCallback,
    ) -> Result<Box<dyn Subscription>> {
        if self.failing_subscription_topics.lock().contains(topic_name) {
            return Err(TransportError::topic_setup(
                topic_name,
                format!("no type support for '{type_name}'"),
            ));
        }
        let entry = Arc::new(SubscriptionEntry {
            callback,
            qos,
            active: AtomicBool::new(true),
        });
        self.subscription_entries
            .lock()
            .insert(topic_name.to_string(), Arc::clone(&entry));
        Ok(Box::new(TestSubscription { entry }))
    }

    fn topic_names_and_types(&self) -> Vec<(String, Vec<String>)> {
        self.graph.lock().clone()
    }

    fn publishers_info_for_topic(&self, topic_name: &str) -> Vec<PublisherInfo> {
        self.publisher_infos
            .lock()
            .get(topic_name)
            .cloned()
            .unwrap_or_default()
    }

    fn is_type_supported(&self, type_name: &str) -> bool {
        !self.unsupported_types.lock().contains(type_name)
    }

    fn expand_topic_name(&self, topic_name: &str) -> String {
        if topic_name.starts_with('/') {
            topic_name.to_string()
        } else {
            format!("/{topic_name}")
        }
    }
}

struct TestPublisher {
    topic_name: String,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl Publisher for TestPublisher {
    fn publish(&self, data: &[u8]) -> Result<()> {
        self.published.lock().push(PublishedMessage {
            topic_name: self.topic_name.clone(),
            data: data.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }
}

struct TestSubscription {
    entry: Arc<SubscriptionEntry>,
}

impl Subscription for TestSubscription {
    fn actual_qos(&self) -> QosProfile {
        self.entry.qos.clone()
    }
}

impl Drop for TestSubscription {
    fn drop(&mut self) {
        self.entry.active.store(false, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or the timeout elapses; returns whether
/// it held.
pub fn wait_for(condition: impl Fn() -> bool, timeout: std::time::Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}
