//! QoS profile negotiation shared by the player and recorder
//!
//! Two directions of adaptation: a publisher offer derived from the profiles
//! recorded in a bag, and a subscription request derived from the profiles of
//! live publishers. In both cases a disagreement between sources downgrades
//! reliability and durability to the weakest variant so no endpoint is left
//! unmatched.

use crate::error::Result;
use crate::types::{QosDurability, QosProfile, QosReliability, TopicMetadata};
use log::{info, warn};
use std::collections::HashMap;

/// Compute the QoS to request when subscribing to `topic_name`, given the
/// profiles currently offered by its live publishers.
pub fn adapt_request_to_offers(topic_name: &str, offers: &[QosProfile]) -> QosProfile {
    if offers.is_empty() {
        return QosProfile::transport_default();
    }
    let reliable = offers
        .iter()
        .filter(|o| o.reliability == QosReliability::Reliable)
        .count();
    let transient_local = offers
        .iter()
        .filter(|o| o.durability == QosDurability::TransientLocal)
        .count();

    let mut request = QosProfile::transport_default();
    if reliable == offers.len() {
        request.reliability = QosReliability::Reliable;
    } else {
        if reliable > 0 {
            warn!(
                "Some, but not all, publishers on topic '{topic_name}' offer reliable delivery. \
                 Falling back to best_effort; messages from reliable-only publishers may be missed."
            );
        }
        request.reliability = QosReliability::BestEffort;
    }
    if transient_local == offers.len() {
        request.durability = QosDurability::TransientLocal;
    } else {
        if transient_local > 0 {
            warn!(
                "Some, but not all, publishers on topic '{topic_name}' offer transient_local \
                 durability. Falling back to volatile; late-joining data will not be received."
            );
        }
        request.durability = QosDurability::Volatile;
    }
    request
}

/// Compute the QoS to offer when republishing `topic_name`, given the
/// profiles its original publishers offered at record time.
pub fn adapt_offer_to_recorded_offers(topic_name: &str, recorded: &[QosProfile]) -> QosProfile {
    if recorded.is_empty() {
        return QosProfile::transport_default();
    }
    if recorded.len() == 1 {
        return recorded[0].clone().default_history();
    }
    if recorded.iter().all(|p| p == &recorded[0]) {
        return recorded[0].clone().default_history();
    }

    warn!(
        "Not all original publishers on topic '{topic_name}' offered the same QoS profile. \
         Offering the lowest common denominator."
    );
    let all_reliable = recorded
        .iter()
        .all(|p| p.reliability == QosReliability::Reliable);
    let all_transient_local = recorded
        .iter()
        .all(|p| p.durability == QosDurability::TransientLocal);
    QosProfile::transport_default()
        .reliability(if all_reliable {
            QosReliability::Reliable
        } else {
            QosReliability::BestEffort
        })
        .durability(if all_transient_local {
            QosDurability::TransientLocal
        } else {
            QosDurability::Volatile
        })
}

/// Determine the QoS a player publisher should offer for a topic.
///
/// Priority: the per-topic override from the play options, then a profile
/// adapted to the QoS recorded in the bag's topic metadata, then the default.
/// Fails when the recorded YAML list cannot be parsed.
pub fn publisher_qos_for_topic(
    topic: &TopicMetadata,
    overrides: &HashMap<String, QosProfile>,
) -> Result<QosProfile> {
    if let Some(profile) = overrides.get(&topic.name) {
        info!("Overriding QoS profile for topic '{}'", topic.name);
        return Ok(profile.clone());
    }
    if topic.offered_qos_profiles.is_empty() {
        return Ok(QosProfile::transport_default());
    }
    let recorded: Vec<QosProfile> = serde_yml::from_str(&topic.offered_qos_profiles)?;
    Ok(adapt_offer_to_recorded_offers(&topic.name, &recorded))
}

/// Determine the QoS a recorder subscription should request for a topic.
///
/// Priority: the per-topic override from the record options, then a profile
/// adapted to the offers of the topic's live publishers.
pub fn subscription_qos_for_topic(
    topic_name: &str,
    overrides: &HashMap<String, QosProfile>,
    live_offers: &[QosProfile],
) -> QosProfile {
    if let Some(profile) = overrides.get(topic_name) {
        info!("Overriding subscription profile for topic '{topic_name}'");
        return profile.clone();
    }
    adapt_request_to_offers(topic_name, live_offers)
}

/// Serialize the profiles currently offered on a topic into the YAML list
/// persisted in the writer's topic metadata.
pub fn serialized_offered_qos_profiles(profiles: &[QosProfile]) -> Result<String> {
    if profiles.is_empty() {
        return Ok(String::new());
    }
    let yaml = serde_yml::to_string(profiles)?;
    Ok(yaml.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reliable() -> QosProfile {
        QosProfile::transport_default()
    }

    fn best_effort() -> QosProfile {
        QosProfile::transport_default().reliability(QosReliability::BestEffort)
    }

    fn transient_local() -> QosProfile {
        QosProfile::transport_default().durability(QosDurability::TransientLocal)
    }

    #[test]
    fn test_request_defaults_without_offers() {
        let request = adapt_request_to_offers("/t", &[]);
        assert_eq!(request, QosProfile::transport_default());
    }

    #[test]
    fn test_request_stays_reliable_when_all_offers_are() {
        let request = adapt_request_to_offers("/t", &[reliable(), reliable()]);
        assert_eq!(request.reliability, QosReliability::Reliable);
        assert_eq!(request.durability, QosDurability::Volatile);
    }

    #[test]
    fn test_request_downgrades_on_mixed_reliability() {
        let request = adapt_request_to_offers("/t", &[reliable(), best_effort()]);
        assert_eq!(request.reliability, QosReliability::BestEffort);
    }

    #[test]
    fn test_request_upgrades_durability_when_unanimous() {
        let request = adapt_request_to_offers("/t", &[transient_local(), transient_local()]);
        assert_eq!(request.durability, QosDurability::TransientLocal);
    }

    #[test]
    fn test_offer_single_recorded_profile_wins() {
        let recorded = vec![best_effort()];
        let offer = adapt_offer_to_recorded_offers("/t", &recorded);
        assert_eq!(offer.reliability, QosReliability::BestEffort);
    }

    #[test]
    fn test_offer_downgrades_on_disagreement() {
        let recorded = vec![reliable(), best_effort()];
        let offer = adapt_offer_to_recorded_offers("/t", &recorded);
        assert_eq!(offer.reliability, QosReliability::BestEffort);
        assert_eq!(offer.durability, QosDurability::Volatile);
    }

    #[test]
    fn test_publisher_qos_prefers_override() {
        let topic = TopicMetadata::new("/t", "std_msgs/msg/String", "cdr", "");
        let mut overrides = HashMap::new();
        overrides.insert("/t".to_string(), best_effort());
        let qos = publisher_qos_for_topic(&topic, &overrides).unwrap();
        assert_eq!(qos.reliability, QosReliability::BestEffort);
    }

    #[test]
    fn test_publisher_qos_parses_recorded_profiles() {
        let yaml = serialized_offered_qos_profiles(&[best_effort()]).unwrap();
        let topic = TopicMetadata::new("/t", "std_msgs/msg/String", "cdr", yaml);
        let qos = publisher_qos_for_topic(&topic, &HashMap::new()).unwrap();
        assert_eq!(qos.reliability, QosReliability::BestEffort);
    }

    #[test]
    fn test_publisher_qos_rejects_malformed_yaml() {
        let topic = TopicMetadata::new("/t", "std_msgs/msg/String", "cdr", ": not yaml [");
        assert!(publisher_qos_for_topic(&topic, &HashMap::new()).is_err());
    }

    #[test]
    fn test_serialized_profiles_empty_for_no_publishers() {
        assert_eq!(serialized_offered_qos_profiles(&[]).unwrap(), "");
    }
}
