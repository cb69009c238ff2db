use crate::error::SchemaFlowError;
use bytes::Bytes;
use std::collections::HashMap;

/// A single message flowing through a pipeline: an opaque payload plus
/// string metadata. Processors that operate per-message attach failures to
/// the message itself rather than aborting the surrounding batch.
#[derive(Debug, Default)]
pub struct Message {
    payload: Bytes,
    metadata: HashMap<String, String>,
    error: Option<SchemaFlowError>,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
            error: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Parses the payload as a JSON document.
    pub fn as_structured(&self) -> crate::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SchemaFlowError::InvalidPayload(e.to_string()))
    }

    pub fn set_bytes(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn set_error(&mut self, err: SchemaFlowError) {
        self.error = Some(err);
    }

    pub fn error(&self) -> Option<&SchemaFlowError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// An ordered batch of messages processed as a unit. Individual messages
/// succeed or fail independently.
#[derive(Debug, Default)]
pub struct MessageBatch {
    messages: Vec<Message>,
}

impl MessageBatch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Message> {
        self.messages.iter_mut()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl FromIterator<Message> for MessageBatch {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl std::ops::Index<usize> for MessageBatch {
    type Output = Message;

    fn index(&self, index: usize) -> &Message {
        &self.messages[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_structured_roundtrip() {
        let msg = Message::new(r#"{"name":"orders","count":3}"#);
        let doc = msg.as_structured().unwrap();
        assert_eq!(doc["name"], "orders");
        assert_eq!(doc["count"], 3);
    }

    #[test]
    fn test_message_invalid_json_payload() {
        let msg = Message::new(&b"\x00\x01not json"[..]);
        assert!(matches!(
            msg.as_structured(),
            Err(SchemaFlowError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_message_error_marking() {
        let mut msg = Message::new("{}");
        assert!(!msg.is_failed());
        msg.set_error(SchemaFlowError::SubjectNotFound("orders".into()));
        assert!(msg.is_failed());
        assert!(matches!(
            msg.error(),
            Some(SchemaFlowError::SubjectNotFound(_))
        ));
    }
}
