//! Recording engine: discovers live topics and writes their messages to a bag
//!
//! A periodic discovery loop polls the middleware graph, filters the topics
//! worth recording and subscribes to the ones not yet covered. Each
//! subscription callback hands its payload straight to the writer, stamped
//! with wall-clock receive time; the writer is internally synchronized, so
//! callbacks from many transport threads write concurrently.

use crate::bag::BagWriter;
use crate::error::{Result, TransportError};
use crate::node::{Node, Subscription, SubscriptionCallback};
use crate::options::{ConversionOptions, RecordOptions, StorageOptions};
use crate::qos::{serialized_offered_qos_profiles, subscription_qos_for_topic};
use crate::topic_filter;
use crate::types::{QosDurability, QosProfile, QosReliability, TopicMetadata};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Slice length for the discovery sleep, so stop requests are honored
/// promptly even with long polling intervals.
const DISCOVERY_STOP_POLL_PERIOD: Duration = Duration::from_millis(50);

/// Records live topics into a bag until stopped or dropped.
///
/// The writer is held by shared reference: it may be inspected externally
/// while recording is in progress (e.g., by the snapshot service layer).
pub struct Recorder {
    writer: Arc<dyn BagWriter>,
    node: Arc<dyn Node>,
    storage_options: StorageOptions,
    record_options: RecordOptions,
    subscriptions: Mutex<HashMap<String, Box<dyn Subscription>>>,
    topics_warned_about_incompatibility: Mutex<HashSet<String>>,
    topic_unknown_types: Mutex<HashSet<String>>,
    stop_discovery: AtomicBool,
    discovery_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    pub fn new(
        writer: Arc<dyn BagWriter>,
        node: Arc<dyn Node>,
        storage_options: StorageOptions,
        record_options: RecordOptions,
    ) -> Self {
        let stop_discovery = AtomicBool::new(record_options.is_discovery_disabled);
        Self {
            writer,
            node,
            storage_options,
            record_options,
            subscriptions: Mutex::new(HashMap::new()),
            topics_warned_about_incompatibility: Mutex::new(HashSet::new()),
            topic_unknown_types: Mutex::new(HashSet::new()),
            stop_discovery,
            discovery_thread: Mutex::new(None),
        }
    }

    /// Open the writer, subscribe to the initial topic set and start the
    /// discovery loop (unless disabled). Fails on an empty serialization
    /// format, on writer open errors and on malformed selection regexes.
    pub fn record(self: &Arc<Self>) -> Result<()> {
        if self.record_options.rmw_serialization_format.is_empty() {
            return Err(TransportError::invalid_configuration(
                "No serialization format specified!",
            ));
        }
        let conversion = ConversionOptions {
            input_serialization_format: self.node.serialization_format(),
            output_serialization_format: self.record_options.rmw_serialization_format.clone(),
        };
        self.writer.open(&self.storage_options, &conversion)?;

        info!("Listening for topics...");
        let initial_topics = self.requested_or_available_topics()?;
        self.subscribe_topics(initial_topics);

        if !self.record_options.is_discovery_disabled {
            let weak = Arc::downgrade(self);
            let handle = thread::Builder::new()
                .name("topics-discovery".into())
                .spawn(move || discovery_loop(weak))
                .expect("Failed to spawn topic discovery thread");
            *self.discovery_thread.lock() = Some(handle);
        }
        Ok(())
    }

    /// Stop the discovery loop. Existing subscriptions keep recording until
    /// the recorder is dropped.
    pub fn stop_discovery(&self) {
        self.stop_discovery.store(true, Ordering::SeqCst);
    }

    /// In snapshot mode, persist the writer's buffered window. The external
    /// RPC service layer binds its snapshot operation to this method.
    pub fn take_snapshot(&self) -> bool {
        self.writer.take_snapshot()
    }

    /// Names of the currently subscribed topics.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Topics for which a QoS incompatibility warning has been emitted.
    pub fn topics_using_fallback_qos(&self) -> HashSet<String> {
        self.topics_warned_about_incompatibility.lock().clone()
    }

    /// The writer this recorder feeds.
    pub fn writer_handle(&self) -> &Arc<dyn BagWriter> {
        &self.writer
    }

    /// One discovery pass. Returns false when discovery should stop because
    /// every explicitly requested topic is covered.
    fn discovery_step(&self) -> bool {
        let topics_to_subscribe = match self.requested_or_available_topics() {
            Ok(topics) => topics,
            Err(e) => {
                error!("Topic discovery failed: {e}");
                return false;
            }
        };
        for topic_name in topics_to_subscribe.keys() {
            self.warn_if_new_qos_for_subscribed_topic(topic_name);
        }
        let missing_topics = self.missing_topics(topics_to_subscribe);
        self.subscribe_topics(missing_topics);

        if !self.record_options.topics.is_empty()
            && self.subscriptions.lock().len() == self.record_options.topics.len()
        {
            info!("All requested topics are subscribed. Stopping discovery...");
            return false;
        }
        true
    }

    /// The topics that should currently be recorded: the live graph reduced
    /// by type sanity, the explicit list (if any) and the regex selection.
    fn requested_or_available_topics(&self) -> Result<HashMap<String, String>> {
        let all_topics_and_types = self.node.topic_names_and_types();
        let mut filtered = topic_filter::filter_topics_with_more_than_one_type(
            &all_topics_and_types,
            self.record_options.include_hidden_topics,
        );
        {
            let mut unknown_types = self.topic_unknown_types.lock();
            filtered = topic_filter::filter_topics_with_known_type(
                filtered,
                &mut unknown_types,
                |type_name| self.node.is_type_supported(type_name),
            );
        }
        if !self.record_options.topics.is_empty() {
            let expanded_topics: Vec<String> = self
                .record_options
                .topics
                .iter()
                .map(|topic| self.node.expand_topic_name(topic))
                .collect();
            filtered = topic_filter::filter_topics(&expanded_topics, filtered);
        }
        if self.record_options.regex.is_empty() && self.record_options.exclude.is_empty() {
            return Ok(filtered);
        }
        topic_filter::filter_topics_using_regex(
            filtered,
            &self.record_options.regex,
            &self.record_options.exclude,
            self.record_options.all,
        )
    }

    fn missing_topics(&self, all_topics: HashMap<String, String>) -> HashMap<String, String> {
        let subscriptions = self.subscriptions.lock();
        all_topics
            .into_iter()
            .filter(|(name, _)| !subscriptions.contains_key(name))
            .collect()
    }

    fn subscribe_topics(&self, topics_and_types: HashMap<String, String>) {
        for (name, type_name) in topics_and_types {
            let offered_qos_profiles =
                match serialized_offered_qos_profiles(&self.live_offers(&name)) {
                    Ok(yaml) => yaml,
                    Err(e) => {
                        warn!("Failed to serialize offered QoS profiles for '{name}': {e}");
                        String::new()
                    }
                };
            self.subscribe_topic(TopicMetadata::new(
                name,
                type_name,
                self.record_options.rmw_serialization_format.clone(),
                offered_qos_profiles,
            ));
        }
    }

    fn subscribe_topic(&self, topic: TopicMetadata) {
        // The topic must exist in the writer before the subscription does:
        // the callback can fire before the next statement executes.
        if let Err(e) = self.writer.create_topic(&topic) {
            warn!("Failed to create topic '{}' in the bag: {e}", topic.name);
            return;
        }

        let qos = subscription_qos_for_topic(
            &topic.name,
            &self.record_options.topic_qos_profile_overrides,
            &self.live_offers(&topic.name),
        );
        let callback = self.make_write_callback(topic.name.clone(), topic.message_type.clone());
        match self
            .node
            .create_subscription(&topic.name, &topic.message_type, qos, callback)
        {
            Ok(subscription) => {
                self.subscriptions
                    .lock()
                    .insert(topic.name.clone(), subscription);
                info!("Subscribed to topic '{}'", topic.name);
            }
            Err(e) => {
                warn!("Failed to subscribe to topic '{}': {e}", topic.name);
                if let Err(e) = self.writer.remove_topic(&topic) {
                    warn!("Failed to remove topic '{}' from the bag: {e}", topic.name);
                }
                self.subscriptions.lock().remove(&topic.name);
            }
        }
    }

    fn make_write_callback(&self, topic_name: String, type_name: String) -> SubscriptionCallback {
        let writer = Arc::clone(&self.writer);
        Box::new(move |data: Vec<u8>| {
            let received = wall_time_nanos();
            if let Err(e) = writer.write_serialized(&data, &topic_name, &type_name, received) {
                error!("Failed to write message on topic '{topic_name}': {e}");
            }
        })
    }

    /// Warn (once per topic) when a publisher appears whose offered QoS is
    /// incompatible with the QoS our subscription requested, meaning its
    /// messages will not be recorded.
    fn warn_if_new_qos_for_subscribed_topic(&self, topic_name: &str) {
        let requested = {
            let subscriptions = self.subscriptions.lock();
            let Some(subscription) = subscriptions.get(topic_name) else {
                // Not subscribed yet.
                return;
            };
            subscription.actual_qos()
        };
        if self
            .topics_warned_about_incompatibility
            .lock()
            .contains(topic_name)
        {
            return;
        }
        for info in self.node.publishers_info_for_topic(topic_name) {
            let offered = info.qos;
            let incompatible_reliability = offered.reliability == QosReliability::BestEffort
                && requested.reliability != QosReliability::BestEffort;
            let incompatible_durability = offered.durability == QosDurability::Volatile
                && requested.durability != QosDurability::Volatile;

            if incompatible_reliability {
                warn!(
                    "A new publisher for subscribed topic '{topic_name}' was found offering \
                     best_effort reliability, but the subscription requested reliable. \
                     Messages from this new publisher will not be recorded."
                );
                self.topics_warned_about_incompatibility
                    .lock()
                    .insert(topic_name.to_string());
                break;
            } else if incompatible_durability {
                warn!(
                    "A new publisher for subscribed topic '{topic_name}' was found offering \
                     volatile durability, but the subscription requested transient_local. \
                     Messages from this new publisher will not be recorded."
                );
                self.topics_warned_about_incompatibility
                    .lock()
                    .insert(topic_name.to_string());
                break;
            }
        }
    }

    fn live_offers(&self, topic_name: &str) -> Vec<QosProfile> {
        self.node
            .publishers_info_for_topic(topic_name)
            .into_iter()
            .map(|info| info.qos)
            .collect()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop_discovery.store(true, Ordering::SeqCst);
        if let Some(handle) = self.discovery_thread.lock().take() {
            // The discovery thread itself can run this drop when it held the
            // last temporary strong reference; it must not join itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        // Dropping the subscriptions tears them down; the transport delivers
        // no further callbacks afterwards.
        self.subscriptions.lock().clear();
    }
}

/// Discovery thread body. Holds only a weak reference between passes so an
/// abandoned recorder winds down instead of running forever.
fn discovery_loop(recorder: Weak<Recorder>) {
    loop {
        let interval = {
            let Some(recorder) = recorder.upgrade() else {
                return;
            };
            if !recorder.node.ok() || recorder.stop_discovery.load(Ordering::Relaxed) {
                return;
            }
            if !recorder.discovery_step() {
                return;
            }
            recorder.record_options.topic_polling_interval
        };
        let mut slept = Duration::ZERO;
        while slept < interval {
            let nap = (interval - slept).min(DISCOVERY_STOP_POLL_PERIOD);
            thread::sleep(nap);
            slept += nap;
            let Some(recorder) = recorder.upgrade() else {
                return;
            };
            if !recorder.node.ok() || recorder.stop_discovery.load(Ordering::Relaxed) {
                return;
            }
        }
    }
}

/// Wall-clock receive stamp for recorded messages.
fn wall_time_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
