//! The normalized event shape that crosses the boundary into the indexer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of observability record an [`Event`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Processor {
    Transaction,
    Span,
    Error,
    Metricset,
    Log,
}

/// Delimiter joining the three parts of a [`Destination`] name.
const DESTINATION_DELIMITER: char = '-';

/// A validated `type-dataset-namespace` data stream name.
///
/// Constructing a `Destination` is the only way to produce a bulk-item target string, so the
/// "none of the three parts is empty, none contains the delimiter" invariant can't be
/// bypassed by callers that already have a `String` lying around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDestination", into = "RawDestination")]
pub struct Destination {
    r#type: String,
    dataset: String,
    namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDestination {
    r#type: String,
    dataset: String,
    namespace: String,
}

impl TryFrom<RawDestination> for Destination {
    type Error = DestinationError;

    fn try_from(raw: RawDestination) -> Result<Self, Self::Error> {
        Destination::new(raw.r#type, raw.dataset, raw.namespace)
    }
}

impl From<Destination> for RawDestination {
    fn from(d: Destination) -> Self {
        RawDestination {
            r#type: d.r#type,
            dataset: d.dataset,
            namespace: d.namespace,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("destination part {part} must not be empty")]
    Empty { part: &'static str },
    #[error("destination part {part} must not contain '{DESTINATION_DELIMITER}': {value:?}")]
    ContainsDelimiter { part: &'static str, value: String },
}

impl Destination {
    pub fn new(
        r#type: impl Into<String>,
        dataset: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, DestinationError> {
        let r#type = r#type.into();
        let dataset = dataset.into();
        let namespace = namespace.into();

        for (part, value) in [
            ("type", &r#type),
            ("dataset", &dataset),
            ("namespace", &namespace),
        ] {
            if value.is_empty() {
                return Err(DestinationError::Empty { part });
            }
            if value.contains(DESTINATION_DELIMITER) {
                return Err(DestinationError::ContainsDelimiter {
                    part,
                    value: value.clone(),
                });
            }
        }

        Ok(Self {
            r#type,
            dataset,
            namespace,
        })
    }

    /// The verbatim bulk-item target string.
    pub fn name(&self) -> String {
        format!(
            "{}{DESTINATION_DELIMITER}{}{DESTINATION_DELIMITER}{}",
            self.r#type, self.dataset, self.namespace
        )
    }
}

/// A normalized observability event ready to be handed to the indexer.
///
/// `body` is an opaque, self-describing document (`serde_json::Value`) — the indexer
/// neither knows nor cares about agent-specific payload shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub processor: Processor,
    pub destination: Destination,
    pub body: serde_json::Value,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        processor: Processor,
        destination: Destination,
        body: serde_json::Value,
    ) -> Self {
        Self {
            timestamp,
            processor,
            destination,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_name_joins_parts() {
        let d = Destination::new("logs", "firehose", "default").unwrap();
        assert_eq!(d.name(), "logs-firehose-default");
    }

    #[test]
    fn destination_rejects_empty_part() {
        let err = Destination::new("", "firehose", "default").unwrap_err();
        assert_eq!(err, DestinationError::Empty { part: "type" });
    }

    #[test]
    fn destination_rejects_delimiter_in_part() {
        let err = Destination::new("logs", "fire-hose", "default").unwrap_err();
        assert_eq!(
            err,
            DestinationError::ContainsDelimiter {
                part: "dataset",
                value: "fire-hose".to_string()
            }
        );
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = Event::new(
            Utc::now(),
            Processor::Log,
            Destination::new("logs", "firehose", "default").unwrap(),
            serde_json::json!({"message": "hello"}),
        );
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.destination.name(), "logs-firehose-default");
    }
}
