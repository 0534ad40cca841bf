//! # Broker Topic Taxonomy
//!
//! Broker-style transports subscribe once per category with a wildcard filter
//! and fan everything into the same dispatcher. Filters follow MQTT rules:
//! `+` matches exactly one level, `#` matches the remainder (including nothing).

/// Logical categories of broker traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    /// Continuous per-hospital metrics. Throttled path.
    HospitalMetrics,
    /// Alerts raised by a single hospital. Dedup path.
    HospitalAlerts,
    /// Global alerts from the prediction service. Dedup path.
    PredictionAlerts,
    /// Patient arrivals carrying an embedded context record.
    Arrivals,
}

impl TopicCategory {
    /// Every category, in subscription order.
    pub const ALL: [TopicCategory; 4] = [
        TopicCategory::HospitalMetrics,
        TopicCategory::HospitalAlerts,
        TopicCategory::PredictionAlerts,
        TopicCategory::Arrivals,
    ];

    /// The wildcard subscription filter of this category.
    pub fn filter(&self) -> &'static str {
        match self {
            TopicCategory::HospitalMetrics => "hospitals/+/metrics",
            TopicCategory::HospitalAlerts => "hospitals/+/alerts",
            TopicCategory::PredictionAlerts => "predictions/alerts/#",
            TopicCategory::Arrivals => "arrivals/#",
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            TopicCategory::HospitalMetrics => "hospital_metrics",
            TopicCategory::HospitalAlerts => "hospital_alerts",
            TopicCategory::PredictionAlerts => "prediction_alerts",
            TopicCategory::Arrivals => "arrivals",
        }
    }
}

/// One filter per category, to hand to a broker client.
pub fn subscription_filters() -> Vec<&'static str> {
    TopicCategory::ALL.iter().map(|c| c.filter()).collect()
}

/// MQTT-style filter match.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => match topic_levels.next() {
                Some(t) if t == literal => {}
                _ => return false,
            },
        }
    }
    topic_levels.next().is_none()
}

/// First category whose filter matches the topic.
pub fn classify(topic: &str) -> Option<TopicCategory> {
    TopicCategory::ALL
        .into_iter()
        .find(|c| topic_matches(c.filter(), topic))
}

/// Hospital id embedded in `hospitals/<id>/...` topics.
pub fn hospital_segment(topic: &str) -> Option<&str> {
    let mut levels = topic.split('/');
    match (levels.next(), levels.next()) {
        (Some("hospitals"), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}
