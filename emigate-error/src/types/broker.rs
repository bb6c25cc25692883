use std::{any::Any, time::Duration};

use crate::{ErrorExt, StatusCode, TransportError};

/// Ошибки ядра брокера request/reply.
///
/// `Timeout` означает «ответа не было». Ошибка, закодированная удалённой
/// стороной внутри payload ответа, сюда не попадает: такой ответ
/// возвращается вызывающему как обычное значение.
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// Проверка существования или создание топика не удались
    TopicResolution { topic: String, reason: String },
    /// Транспорт не принял публикацию
    Publish { topic: String, reason: String },
    /// Payload не сериализуется в JSON
    Serialization { reason: String },
    /// Ответ с нужным correlation id не пришёл до дедлайна
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },
    /// Подписка не поднялась (изолированно от остальных)
    SubscriptionSetup {
        topic: String,
        subscription: String,
        reason: String,
    },
    /// Тело входящего сообщения не декодируется
    MalformedMessage {
        topic: String,
        message_id: String,
        reason: String,
    },
    /// Для этого correlation id уже есть активное ожидание
    DuplicateWait { correlation_id: String },
    /// Брокер остановлен
    Closed,
    /// Не все подписки удалось отсоединить при остановке
    Disconnect { failed: Vec<String> },
}

impl BrokerError {
    pub fn topic_resolution(
        topic: impl Into<String>,
        err: &TransportError,
    ) -> Self {
        Self::TopicResolution {
            topic: topic.into(),
            reason: err.to_string(),
        }
    }

    pub fn publish(
        topic: impl Into<String>,
        err: &TransportError,
    ) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: err.to_string(),
        }
    }

    /// Является ли ошибка таймаутом ожидания ответа.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::TopicResolution { topic, reason } => {
                write!(f, "Failed to resolve topic {topic}: {reason}")
            }
            Self::Publish { topic, reason } => {
                write!(f, "Failed to publish to {topic}: {reason}")
            }
            Self::Serialization { reason } => write!(f, "Payload serialization failed: {reason}"),
            Self::Timeout {
                correlation_id,
                timeout,
            } => write!(
                f,
                "No reply for correlation id {correlation_id} within {}ms",
                timeout.as_millis()
            ),
            Self::SubscriptionSetup {
                topic,
                subscription,
                reason,
            } => write!(
                f,
                "Failed to set up subscription {subscription} on {topic}: {reason}"
            ),
            Self::MalformedMessage {
                topic,
                message_id,
                reason,
            } => write!(f, "Malformed message {message_id} on {topic}: {reason}"),
            Self::DuplicateWait { correlation_id } => {
                write!(f, "A reply is already awaited for correlation id {correlation_id}")
            }
            Self::Closed => write!(f, "Broker is closed"),
            Self::Disconnect { failed } => {
                write!(f, "Failed to detach subscriptions: {}", failed.join(", "))
            }
        }
    }
}

impl std::error::Error for BrokerError {}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TopicResolution { .. } => StatusCode::TopicResolutionFailed,
            Self::Publish { .. } => StatusCode::PublishFailed,
            Self::Serialization { .. } => StatusCode::SerializationFailed,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::SubscriptionSetup { .. } => StatusCode::SubscriptionSetupFailed,
            Self::MalformedMessage { .. } => StatusCode::MalformedMessage,
            Self::DuplicateWait { .. } => StatusCode::DuplicateCorrelation,
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Disconnect { .. } => StatusCode::DetachFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::TopicResolution { .. } | Self::Publish { .. } => {
                "Backend is not reachable".to_string()
            }
            Self::Serialization { .. } => "Request payload could not be encoded".to_string(),
            Self::Timeout { .. } => "Backend did not reply in time".to_string(),
            Self::DuplicateWait { .. } => "Request is already in flight".to_string(),
            Self::Closed => "Broker is closed".to_string(),
            Self::SubscriptionSetup { .. }
            | Self::MalformedMessage { .. }
            | Self::Disconnect { .. } => "Internal server error".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "broker".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::TopicResolution { topic, .. }
            | Self::Publish { topic, .. }
            | Self::SubscriptionSetup { topic, .. }
            | Self::MalformedMessage { topic, .. } => {
                tags.push(("topic", topic.clone()));
            }
            Self::Timeout { timeout, .. } => {
                tags.push(("timeout_ms", timeout.as_millis().to_string()));
            }
            Self::Disconnect { failed } => {
                tags.push(("failed_bindings", failed.len().to_string()));
            }
            _ => {}
        }

        tags
    }
}
