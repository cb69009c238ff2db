//! Per-message subject resolution.
//!
//! Subjects name schema lineages in the registry. A subject can be a fixed
//! string or derived from message metadata through `${meta:key}`
//! placeholders, e.g. `${meta:kafka_topic}-value`.

use crate::error::SchemaFlowError;
use crate::types::MessageBatch;

/// Evaluates the configured subject expression against one message of a
/// batch. Injected into the encoder so routing stays pluggable.
pub trait SubjectResolver: Send + Sync {
    fn resolve(&self, batch: &MessageBatch, index: usize) -> crate::Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Meta(String),
}

/// A compiled subject pattern of literal text and `${meta:key}` placeholders.
#[derive(Debug, Clone)]
pub struct SubjectPattern {
    segments: Vec<Segment>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> crate::Result<Self> {
        let mut segments = Vec::new();
        let mut rest = pattern;
        while let Some(start) = rest.find("${meta:") {
            let end = rest[start..].find('}').ok_or_else(|| {
                SchemaFlowError::Config(format!(
                    "unterminated placeholder in subject pattern '{}'",
                    pattern
                ))
            })? + start;
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let key = &rest[start + "${meta:".len()..end];
            if key.is_empty() {
                return Err(SchemaFlowError::Config(format!(
                    "empty metadata key in subject pattern '{}'",
                    pattern
                )));
            }
            segments.push(Segment::Meta(key.to_string()));
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        if segments.is_empty() {
            return Err(SchemaFlowError::Config(
                "subject pattern must not be empty".to_string(),
            ));
        }
        Ok(Self { segments })
    }

    /// True when the pattern never consults message metadata.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl SubjectResolver for SubjectPattern {
    fn resolve(&self, batch: &MessageBatch, index: usize) -> crate::Result<String> {
        let msg = batch.get(index).ok_or_else(|| {
            SchemaFlowError::SubjectResolution(format!("message index {} out of range", index))
        })?;
        let mut subject = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => subject.push_str(text),
                Segment::Meta(key) => match msg.metadata(key) {
                    Some(value) => subject.push_str(value),
                    None => {
                        return Err(SchemaFlowError::SubjectResolution(format!(
                            "message has no metadata key '{}'",
                            key
                        )))
                    }
                },
            }
        }
        Ok(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_static_pattern() {
        let pattern = SubjectPattern::parse("orders-value").unwrap();
        assert!(pattern.is_static());

        let batch = MessageBatch::new(vec![Message::new("{}")]);
        assert_eq!(pattern.resolve(&batch, 0).unwrap(), "orders-value");
    }

    #[test]
    fn test_metadata_pattern() {
        let pattern = SubjectPattern::parse("${meta:kafka_topic}-value").unwrap();
        assert!(!pattern.is_static());

        let batch = MessageBatch::new(vec![
            Message::new("{}").with_metadata("kafka_topic", "orders"),
            Message::new("{}").with_metadata("kafka_topic", "payments"),
        ]);
        assert_eq!(pattern.resolve(&batch, 0).unwrap(), "orders-value");
        assert_eq!(pattern.resolve(&batch, 1).unwrap(), "payments-value");
    }

    #[test]
    fn test_missing_metadata_key_errors() {
        let pattern = SubjectPattern::parse("${meta:kafka_topic}-value").unwrap();
        let batch = MessageBatch::new(vec![Message::new("{}")]);
        assert!(matches!(
            pattern.resolve(&batch, 0),
            Err(SchemaFlowError::SubjectResolution(_))
        ));
    }

    #[test]
    fn test_mixed_segments() {
        let pattern = SubjectPattern::parse("cdc.${meta:db}.${meta:table}").unwrap();
        let batch = MessageBatch::new(vec![Message::new("{}")
            .with_metadata("db", "shop")
            .with_metadata("table", "orders")]);
        assert_eq!(pattern.resolve(&batch, 0).unwrap(), "cdc.shop.orders");
    }

    #[test]
    fn test_unterminated_placeholder_rejected() {
        assert!(SubjectPattern::parse("${meta:topic").is_err());
        assert!(SubjectPattern::parse("${meta:}").is_err());
        assert!(SubjectPattern::parse("").is_err());
    }
}
