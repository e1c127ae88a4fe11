//! Playback engine: streams bag messages into the live middleware
//!
//! Two threads cooperate over the read-ahead queue. The storage loading
//! thread drains the reader into the queue whenever the fill level drops
//! below the lower boundary; the play loop peeks the head message, sleeps on
//! the virtual clock until its timestamp, publishes and pops. Control
//! operations (`pause`, `resume`, `set_rate`, `play_next`, `seek`) arrive on
//! external request threads and coordinate with the play loop through the
//! clock, a steal flag and a cancellation flag.

use crate::bag::{BagReader, StorageFilter};
use crate::clock::PlayerClock;
use crate::error::Result;
use crate::node::{Node, Publisher};
use crate::options::{ConversionOptions, PlayOptions, StorageOptions};
use crate::qos::publisher_qos_for_topic;
use crate::queue::MessageQueue;
use crate::types::{QosDurability, QosHistory, QosProfile, QosReliability, SerializedMessage};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Topic the virtual clock is republished on when enabled.
pub const CLOCK_TOPIC: &str = "/clock";
/// Message type used for clock updates; the payload is the current bag time
/// as a little-endian i64 nanosecond count.
pub const CLOCK_TOPIC_TYPE: &str = "rosgraph_msgs/msg/Clock";

/// Poll period while waiting for the queue to fill before playback starts.
const QUEUE_READ_WAIT_PERIOD: Duration = Duration::from_millis(100);
/// The storage loader refills once the queue drops below this fraction of
/// the configured read-ahead size.
const READ_AHEAD_LOWER_BOUND_PERCENTAGE: f64 = 0.9;
/// Nap taken by the storage loader while the queue is sufficiently full.
const STORAGE_IDLE_PERIOD: Duration = Duration::from_millis(1);
/// Poll period while the play loop waits out a starved queue.
const STARVATION_POLL_PERIOD: Duration = Duration::from_micros(100);
/// Upper bound on each clock-publisher nap, so drop() joins promptly.
const CLOCK_STOP_POLL_PERIOD: Duration = Duration::from_millis(50);

/// Plays one bag into the middleware, with pause/resume/seek/step control.
///
/// The player owns its reader for its whole lifetime: opened once at
/// construction, closed on drop. One player may run many `play()` passes
/// (looping or restarted by the caller).
pub struct Player {
    node: Arc<dyn Node>,
    play_options: PlayOptions,
    reader: Arc<Mutex<Box<dyn BagReader>>>,
    starting_time: i64,
    clock: Arc<PlayerClock>,
    message_queue: Arc<MessageQueue>,
    publishers: HashMap<String, Box<dyn Publisher>>,
    storage_loading: Mutex<Option<JoinHandle<()>>>,
    ready_to_play_from_queue: Mutex<bool>,
    ready_to_play_from_queue_cv: Condvar,
    skip_message_in_main_play_loop: Mutex<bool>,
    cancel_wait_for_next_message: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    clock_publish_thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Open the reader, snapshot the bag's starting time, apply the initial
    /// rate and create a publisher for every (unfiltered) topic in the bag.
    pub fn new(
        mut reader: Box<dyn BagReader>,
        node: Arc<dyn Node>,
        storage_options: StorageOptions,
        play_options: PlayOptions,
    ) -> Result<Self> {
        let conversion = ConversionOptions {
            input_serialization_format: String::new(),
            output_serialization_format: node.serialization_format(),
        };
        reader.open(&storage_options, &conversion)?;
        let starting_time = reader.metadata()?.starting_time;

        let mut player = Self {
            node,
            play_options,
            reader: Arc::new(Mutex::new(reader)),
            starting_time,
            clock: Arc::new(PlayerClock::new(starting_time)),
            message_queue: Arc::new(MessageQueue::new()),
            publishers: HashMap::new(),
            storage_loading: Mutex::new(None),
            ready_to_play_from_queue: Mutex::new(false),
            ready_to_play_from_queue_cv: Condvar::new(),
            skip_message_in_main_play_loop: Mutex::new(false),
            cancel_wait_for_next_message: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            clock_publish_thread: None,
        };
        player.set_rate(player.play_options.rate);
        player.prepare_publishers()?;
        Ok(player)
    }

    /// Run playback to the end of the bag (or forever with looping),
    /// blocking the calling thread. Storage and publish errors end the pass
    /// and are logged, not propagated.
    pub fn play(&self) {
        let mut delay = Duration::ZERO;
        if self.play_options.delay >= 0 {
            delay = Duration::from_nanos(self.play_options.delay as u64);
        } else {
            warn!(
                "Invalid delay value: {} ns. Delay is disabled.",
                self.play_options.delay
            );
        }

        let result: Result<()> = (|| {
            loop {
                if !delay.is_zero() {
                    info!("Sleep {} ns", delay.as_nanos());
                    thread::sleep(delay);
                }
                {
                    let mut reader = self.reader.lock();
                    reader.seek(self.starting_time)?;
                    self.clock.jump(self.starting_time);
                }
                self.start_storage_loading();
                self.wait_for_filled_queue();
                self.play_messages_from_queue()?;
                {
                    let mut ready = self.ready_to_play_from_queue.lock();
                    *ready = false;
                    self.ready_to_play_from_queue_cv.notify_all();
                }
                if !(self.play_options.loop_playback && self.ok()) {
                    break;
                }
            }
            Ok(())
        })();
        if let Err(e) = result {
            error!("Failed to play: {e}");
        }

        let mut ready = self.ready_to_play_from_queue.lock();
        *ready = false;
        self.ready_to_play_from_queue_cv.notify_all();
    }

    pub fn pause(&self) {
        self.clock.pause();
        info!("Pausing play.");
    }

    pub fn resume(&self) {
        self.clock.resume();
        info!("Resuming play.");
    }

    pub fn toggle_paused(&self) {
        if self.is_paused() {
            self.resume()
        } else {
            self.pause()
        }
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    pub fn get_rate(&self) -> f64 {
        self.clock.get_rate()
    }

    pub fn set_rate(&self, rate: f64) -> bool {
        let accepted = self.clock.set_rate(rate);
        if accepted {
            info!("Set rate to {rate}");
        } else {
            warn!("Failed to set rate to invalid value {rate}");
        }
        accepted
    }

    /// Publish exactly one message while paused, advancing the virtual clock
    /// to its timestamp. Messages whose topic has no publisher (filtered or
    /// unknown type) are skipped silently without counting as "the next
    /// message". Returns whether a message was published.
    pub fn play_next(&self) -> bool {
        if !self.clock.is_paused() {
            warn!("Called play next, but not in paused state.");
            return false;
        }
        info!("Playing next message.");

        // Temporarily take playback over from the play loop.
        let mut skip = self.skip_message_in_main_play_loop.lock();
        *skip = true;
        self.wait_until_ready_to_play_from_queue();

        let mut message = self.peek_next_message_from_queue();
        let mut next_message_published = false;
        while !next_message_published {
            let Some(current) = message else { break };
            match self.publish_message(&current) {
                Ok(published) => {
                    next_message_published = published;
                    if published {
                        self.clock.jump(current.time_stamp);
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to publish message on topic '{}': {e}",
                        current.topic_name
                    );
                }
            }
            self.message_queue.pop();
            message = self.peek_next_message_from_queue();
        }
        next_message_published
    }

    /// Reposition playback at `time_point` (clamped to the bag's starting
    /// time; seeking past the end leaves the queue empty and the pass ends).
    pub fn seek(&self, time_point: i64) -> Result<()> {
        // Temporarily stop playback in the play loop and block play_next().
        let mut skip = self.skip_message_in_main_play_loop.lock();
        *skip = true;
        self.wait_until_ready_to_play_from_queue();
        self.cancel_wait_for_next_message
            .store(true, Ordering::SeqCst);

        let time_point = time_point.max(self.starting_time);
        let mut reader = self.reader.lock();
        // Purge messages read from the old cursor position.
        while self.message_queue.pop() {}
        reader.seek(time_point)?;
        self.clock.jump(time_point);
        // Restart the storage loader if it finished (previously reached the
        // end of the bag); otherwise loading continues once the reader mutex
        // is released.
        if self.is_storage_completely_loaded() && self.ok() {
            self.start_storage_loading();
        }
        Ok(())
    }

    fn ok(&self) -> bool {
        self.node.ok() && !self.stopped.load(Ordering::Relaxed)
    }

    fn wait_until_ready_to_play_from_queue(&self) {
        let mut ready = self.ready_to_play_from_queue.lock();
        while !*ready {
            self.ready_to_play_from_queue_cv.wait(&mut ready);
        }
    }

    fn start_storage_loading(&self) {
        let reader = Arc::clone(&self.reader);
        let queue = Arc::clone(&self.message_queue);
        let node = Arc::clone(&self.node);
        let stopped = Arc::clone(&self.stopped);
        let upper_boundary = self.play_options.read_ahead_queue_size.max(1);
        let lower_boundary =
            ((upper_boundary as f64 * READ_AHEAD_LOWER_BOUND_PERCENTAGE) as usize).max(1);
        let handle = thread::Builder::new()
            .name("storage-loading".into())
            .spawn(move || {
                load_storage_content(&reader, &queue, &node, &stopped, lower_boundary, upper_boundary)
            })
            .expect("Failed to spawn storage loading thread");
        *self.storage_loading.lock() = Some(handle);
    }

    /// Whether the storage loading thread has finished (reader exhausted or
    /// failed). Joins the thread as a side effect once it is done.
    fn is_storage_completely_loaded(&self) -> bool {
        let mut loading = self.storage_loading.lock();
        if loading.as_ref().is_some_and(|handle| handle.is_finished()) {
            if let Some(handle) = loading.take() {
                let _ = handle.join();
            }
        }
        loading.is_none()
    }

    fn wait_for_filled_queue(&self) {
        while self.message_queue.size_approx() < self.play_options.read_ahead_queue_size
            && !self.is_storage_completely_loaded()
            && self.ok()
        {
            thread::sleep(QUEUE_READ_WAIT_PERIOD);
        }
    }

    /// Head of the queue, waiting out producer starvation if necessary.
    fn peek_next_message_from_queue(&self) -> Option<Arc<SerializedMessage>> {
        let mut message = self.message_queue.peek();
        if message.is_none() && !self.is_storage_completely_loaded() && self.ok() {
            warn!(
                "Message queue starved. Messages will be delayed. Consider increasing the \
                 read_ahead_queue_size option."
            );
            while message.is_none() && !self.is_storage_completely_loaded() && self.ok() {
                thread::sleep(STARVATION_POLL_PERIOD);
                message = self.message_queue.peek();
            }
        }
        // Covers the race where the producer finished between the first peek
        // and the completion check.
        if message.is_none() {
            message = self.message_queue.peek();
        }
        message
    }

    fn play_messages_from_queue(&self) -> Result<()> {
        let mut message = self.peek_next_message_from_queue();
        {
            // Control operations may only proceed after the first peek; the
            // queue head must not be peeked from two threads at once.
            let mut ready = self.ready_to_play_from_queue.lock();
            *ready = true;
            self.ready_to_play_from_queue_cv.notify_all();
        }
        while self.ok() {
            let Some(current) = message else { break };
            // Do not move on until sleep_until returns true. It always
            // sleeps at least briefly, so pausing does not busy-loop here.
            while self.ok() && !self.clock.sleep_until(current.time_stamp) {
                if self
                    .cancel_wait_for_next_message
                    .swap(false, Ordering::SeqCst)
                {
                    break;
                }
            }
            // The guard spans publish, pop and re-peek so a concurrent
            // play_next()/seek() cannot interleave its own pop.
            let mut skip = self.skip_message_in_main_play_loop.lock();
            if self.ok() {
                if *skip {
                    // The step/seek path already published or purged this
                    // message; take a fresh look without popping.
                    *skip = false;
                    self.cancel_wait_for_next_message
                        .store(false, Ordering::SeqCst);
                    message = self.peek_next_message_from_queue();
                    continue;
                }
                self.publish_message(&current)?;
            }
            self.message_queue.pop();
            message = self.peek_next_message_from_queue();
        }
        // While paused, do not return just because the queue ran out.
        while self.clock.is_paused() && self.ok() {
            self.clock.sleep_until(self.clock.now());
        }
        Ok(())
    }

    /// Publish one message through its topic's publisher. Returns false when
    /// the topic has no publisher (filtered out or its type was unknown).
    fn publish_message(&self, message: &SerializedMessage) -> Result<bool> {
        match self.publishers.get(&message.topic_name) {
            Some(publisher) => {
                publisher.publish(&message.serialized_data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn prepare_publishers(&mut self) -> Result<()> {
        let filter = StorageFilter {
            topics: self.play_options.topics_to_filter.clone(),
        };
        self.reader.lock().set_filter(filter)?;

        if self.play_options.clock_publish_frequency > 0.0 {
            let period = Duration::from_nanos(
                (1_000_000_000.0 / self.play_options.clock_publish_frequency) as u64,
            );
            let publisher =
                self.node
                    .create_publisher(CLOCK_TOPIC, CLOCK_TOPIC_TYPE, clock_topic_qos())?;
            self.clock_publish_thread = Some(spawn_clock_publisher(
                publisher,
                Arc::clone(&self.clock),
                Arc::clone(&self.node),
                Arc::clone(&self.stopped),
                period,
            ));
        }

        let topics = self.reader.lock().all_topics_and_types()?;
        for topic in topics {
            if self.publishers.contains_key(&topic.name) {
                continue;
            }
            let filter_topics = &self.play_options.topics_to_filter;
            if !filter_topics.is_empty() && !filter_topics.contains(&topic.name) {
                continue;
            }
            let topic_qos = match publisher_qos_for_topic(
                &topic,
                &self.play_options.topic_qos_profile_overrides,
            ) {
                Ok(qos) => qos,
                Err(e) => {
                    warn!("Ignoring topic '{}', reason: {e}.", topic.name);
                    continue;
                }
            };
            match self
                .node
                .create_publisher(&topic.name, &topic.message_type, topic_qos)
            {
                Ok(publisher) => {
                    self.publishers.insert(topic.name.clone(), publisher);
                }
                Err(e) => {
                    warn!("Ignoring topic '{}', reason: {e}.", topic.name);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.storage_loading.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.clock_publish_thread.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.reader.lock().close() {
            error!("Failed to close bag reader: {e}");
        }
    }
}

/// QoS for the clock topic: latest-only, best effort.
fn clock_topic_qos() -> QosProfile {
    QosProfile {
        history: QosHistory::KeepLast,
        depth: 1,
        reliability: QosReliability::BestEffort,
        durability: QosDurability::Volatile,
        ..QosProfile::default()
    }
}

fn spawn_clock_publisher(
    publisher: Box<dyn Publisher>,
    clock: Arc<PlayerClock>,
    node: Arc<dyn Node>,
    stopped: Arc<AtomicBool>,
    period: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("clock-publisher".into())
        .spawn(move || {
            while node.ok() && !stopped.load(Ordering::Relaxed) {
                let now = clock.now();
                if let Err(e) = publisher.publish(&now.to_le_bytes()) {
                    debug!("Failed to publish clock update: {e}");
                }
                // Nap in small slices so drop() never waits a full period.
                let mut slept = Duration::ZERO;
                while slept < period && node.ok() && !stopped.load(Ordering::Relaxed) {
                    let nap = (period - slept).min(CLOCK_STOP_POLL_PERIOD);
                    thread::sleep(nap);
                    slept += nap;
                }
            }
        })
        .expect("Failed to spawn clock publisher thread")
}

/// Storage loading thread body: top the queue up to `upper_boundary`
/// whenever it falls below `lower_boundary`, holding the reader mutex only
/// while actually reading.
fn load_storage_content(
    reader: &Mutex<Box<dyn BagReader>>,
    queue: &MessageQueue,
    node: &Arc<dyn Node>,
    stopped: &AtomicBool,
    lower_boundary: usize,
    upper_boundary: usize,
) {
    while node.ok() && !stopped.load(Ordering::Relaxed) {
        let mut reader_guard = reader.lock();
        if !reader_guard.has_next() {
            break;
        }
        if queue.size_approx() < lower_boundary {
            if let Err(e) = enqueue_up_to_boundary(&mut **reader_guard, queue, upper_boundary) {
                error!("Failed to load messages from storage: {e}");
                break;
            }
        } else {
            drop(reader_guard);
            thread::sleep(STORAGE_IDLE_PERIOD);
        }
    }
}

fn enqueue_up_to_boundary(
    reader: &mut dyn BagReader,
    queue: &MessageQueue,
    boundary: usize,
) -> Result<()> {
    for _ in queue.size_approx()..boundary {
        if !reader.has_next() {
            break;
        }
        queue.enqueue(reader.read_next()?);
    }
    Ok(())
}
