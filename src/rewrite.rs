//! Merge multiple input bags into one or more output bags
//!
//! A k-way merge over the input cursors: one pending slot per reader, refill
//! empty slots, emit the earliest timestamp (ties broken by input order) to
//! every writer. Output is globally non-decreasing in timestamp; overlapping
//! topics across inputs are interleaved, never deduplicated.

use crate::bag::{BagReader, BagWriter};
use crate::error::{Result, TransportError};
use crate::types::SerializedMessage;
use std::collections::HashSet;
use std::sync::Arc;

/// Merge every message of `input_bags` into every bag of `output_bags` in
/// timestamp order. All bags must already be open. Per-writer filtering or
/// splitting is the writer's own responsibility.
pub fn rewrite(
    input_bags: &mut [Box<dyn BagReader>],
    output_bags: &[Box<dyn BagWriter>],
) -> Result<()> {
    if input_bags.is_empty() || output_bags.is_empty() {
        return Err(TransportError::invalid_configuration(
            "Must provide at least one input and one output bag to rewrite.",
        ));
    }

    // Writers must know every topic before the first write for it. On
    // duplicate names across inputs, the first bag's metadata wins.
    let mut seen_topics = HashSet::new();
    for reader in input_bags.iter_mut() {
        for topic in reader.all_topics_and_types()? {
            if seen_topics.insert(topic.name.clone()) {
                for writer in output_bags {
                    writer.create_topic(&topic)?;
                }
            }
        }
    }

    let mut next_messages: Vec<Option<Arc<SerializedMessage>>> = vec![None; input_bags.len()];
    while let Some(message) = next_merged_message(input_bags, &mut next_messages)? {
        for writer in output_bags {
            writer.write(Arc::clone(&message))?;
        }
    }
    Ok(())
}

/// Refill the pending slots and take the earliest message, or `None` when
/// every reader is exhausted.
fn next_merged_message(
    input_bags: &mut [Box<dyn BagReader>],
    next_messages: &mut [Option<Arc<SerializedMessage>>],
) -> Result<Option<Arc<SerializedMessage>>> {
    for (reader, slot) in input_bags.iter_mut().zip(next_messages.iter_mut()) {
        if slot.is_none() && reader.has_next() {
            *slot = Some(reader.read_next()?);
        }
    }

    let mut earliest_index = None;
    let mut earliest_stamp = i64::MAX;
    for (index, slot) in next_messages.iter().enumerate() {
        if let Some(message) = slot {
            if earliest_index.is_none() || message.time_stamp < earliest_stamp {
                earliest_index = Some(index);
                earliest_stamp = message.time_stamp;
            }
        }
    }
    // Clear the winning slot so it refills on the next call.
    Ok(earliest_index.and_then(|index| next_messages[index].take()))
}
