//! Topic selection helpers for the recording engine
//!
//! Discovery hands these functions the raw (topic, types) graph; what comes
//! out is the map of topic name to single type the recorder should subscribe
//! to. Dropped topics are logged, and unknown-type topics are remembered so
//! their warning fires only once across discovery polls.

use crate::error::{Result, TransportError};
use log::{debug, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// A topic is hidden when any namespace segment starts with an underscore.
pub fn topic_is_hidden(topic_name: &str) -> bool {
    topic_name
        .split('/')
        .any(|segment| segment.starts_with('_'))
}

/// Reduce the discovered graph to topics carrying exactly one type,
/// optionally dropping hidden topics.
pub fn filter_topics_with_more_than_one_type(
    topics_and_types: &[(String, Vec<String>)],
    include_hidden_topics: bool,
) -> HashMap<String, String> {
    let mut filtered = HashMap::new();
    for (name, types) in topics_and_types {
        if types.len() > 1 {
            warn!(
                "Topic '{name}' is offered with more than one type; only single-type topics \
                 are recorded."
            );
            continue;
        }
        let Some(type_name) = types.first() else {
            continue;
        };
        if !include_hidden_topics && topic_is_hidden(name) {
            debug!("Hidden topic '{name}' skipped; enable include_hidden_topics to record it.");
            continue;
        }
        filtered.insert(name.clone(), type_name.clone());
    }
    filtered
}

/// Drop topics whose type support cannot be loaded. Each such topic is
/// recorded in `unknown_types` so the warning is emitted exactly once.
pub fn filter_topics_with_known_type(
    topics_and_types: HashMap<String, String>,
    unknown_types: &mut HashSet<String>,
    is_type_supported: impl Fn(&str) -> bool,
) -> HashMap<String, String> {
    let mut filtered = HashMap::new();
    for (name, type_name) in topics_and_types {
        if is_type_supported(&type_name) {
            filtered.insert(name, type_name);
        } else if unknown_types.insert(name.clone()) {
            warn!("Topic '{name}' has unknown type '{type_name}'; it will not be recorded.");
        }
    }
    filtered
}

/// Intersect the discovered topics with an explicitly requested list.
pub fn filter_topics(
    requested_topics: &[String],
    topics_and_types: HashMap<String, String>,
) -> HashMap<String, String> {
    topics_and_types
        .into_iter()
        .filter(|(name, _)| requested_topics.iter().any(|requested| requested == name))
        .collect()
}

/// Apply regex selection: a topic is kept when it matches `regex` (or, with
/// an empty `regex`, when `all` is set) and does not match `exclude`.
pub fn filter_topics_using_regex(
    topics_and_types: HashMap<String, String>,
    regex: &str,
    exclude: &str,
    all: bool,
) -> Result<HashMap<String, String>> {
    let selection = compile(regex)?;
    let exclusion = compile(exclude)?;

    Ok(topics_and_types
        .into_iter()
        .filter(|(name, _)| {
            let selected = selection.as_ref().map_or(all, |re| re.is_match(name));
            let excluded = exclusion.as_ref().is_some_and(|re| re.is_match(name));
            selected && !excluded
        })
        .collect())
}

fn compile(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| TransportError::invalid_configuration(format!("bad topic regex: {e}")))
}
