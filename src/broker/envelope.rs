use std::sync::Arc;

use emigate_error::BrokerError;
use serde_json::Value;

use crate::transport::{Attributes, InboundMessage, MessageId};

/// Атрибут с идентификатором отправителя.
pub const ATTR_SENDER_ID: &str = "senderId";
/// Атрибут с correlation id запроса, на который отвечает сообщение.
pub const ATTR_CORRELATION_ID: &str = "correlationId";
/// Атрибут с типом сообщения.
pub const ATTR_TYPE: &str = "type";
/// Атрибут с топиком, куда ожидаются ответы.
pub const ATTR_REPLY_TO: &str = "replyTo";
/// Атрибут с id сообщения, заданным вызывающим.
pub const ATTR_MESSAGE_ID: &str = "messageId";

/// Декодированное входящее сообщение.
///
/// Создаётся один раз на сообщение транспорта и раздаётся всем слушателям
/// шины по ссылке (`Arc<Envelope>`), поэтому неизменяемо.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source_topic: Arc<str>,
    pub message_id: MessageId,
    pub message_type: Option<String>,
    pub payload: Value,
    pub sender_id: Option<String>,
    pub correlation_id: Option<String>,
    pub attributes: Attributes,
}

impl Envelope {
    /// Декодирует тело (UTF-8 JSON) и метаданные сообщения транспорта.
    pub fn decode(
        source_topic: Arc<str>,
        message: &InboundMessage,
    ) -> Result<Self, BrokerError> {
        let malformed = |reason: String| BrokerError::MalformedMessage {
            topic: source_topic.to_string(),
            message_id: message.id.clone(),
            reason,
        };

        let text = std::str::from_utf8(&message.data)
            .map_err(|e| malformed(format!("body is not valid UTF-8: {e}")))?;
        let payload: Value =
            serde_json::from_str(text).map_err(|e| malformed(format!("body is not JSON: {e}")))?;

        let attr = |key: &str| message.attribute(key).map(str::to_owned);

        Ok(Self {
            message_type: attr(ATTR_TYPE),
            sender_id: attr(ATTR_SENDER_ID),
            correlation_id: attr(ATTR_CORRELATION_ID),
            message_id: message.id.clone(),
            attributes: message.attributes.clone(),
            payload,
            source_topic,
        })
    }

    /// Отправлено ли сообщение данным отправителем.
    pub fn is_from(
        &self,
        sender_id: &str,
    ) -> bool {
        self.sender_id.as_deref() == Some(sender_id)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Тест проверяет, что тело и атрибуты переносятся в конверт.
    #[test]
    fn test_decode_full_message() {
        let msg = InboundMessage::new(
            "17",
            Bytes::from_static(br#"{"x":1,"y":2,"z":3}"#),
            attrs(&[
                (ATTR_TYPE, "Reply"),
                (ATTR_SENDER_ID, "peer"),
                (ATTR_CORRELATION_ID, "9"),
            ]),
        );

        let env = Envelope::decode(Arc::from("emi-gateway-replies"), &msg).unwrap();
        assert_eq!(&*env.source_topic, "emi-gateway-replies");
        assert_eq!(env.message_id, "17");
        assert_eq!(env.message_type.as_deref(), Some("Reply"));
        assert_eq!(env.correlation_id.as_deref(), Some("9"));
        assert_eq!(env.payload, json!({"x": 1, "y": 2, "z": 3}));
        assert!(env.is_from("peer"));
        assert!(!env.is_from("other"));
    }

    /// Тест проверяет, что отсутствующие атрибуты становятся None.
    #[test]
    fn test_decode_without_attributes() {
        let msg = InboundMessage::new("1", Bytes::from_static(b"[1,2]"), Attributes::new());
        let env = Envelope::decode(Arc::from("events"), &msg).unwrap();
        assert_eq!(env.message_type, None);
        assert_eq!(env.sender_id, None);
        assert_eq!(env.correlation_id, None);
        assert_eq!(env.payload, json!([1, 2]));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let msg = InboundMessage::new("5", Bytes::from_static(&[0xff, 0xfe]), Attributes::new());
        let err = Envelope::decode(Arc::from("events"), &msg).unwrap_err();
        match err {
            BrokerError::MalformedMessage {
                topic, message_id, reason,
            } => {
                assert_eq!(topic, "events");
                assert_eq!(message_id, "5");
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let msg = InboundMessage::new("6", Bytes::from_static(b"not json"), Attributes::new());
        let err = Envelope::decode(Arc::from("events"), &msg).unwrap_err();
        assert!(matches!(err, BrokerError::MalformedMessage { .. }));
    }
}
