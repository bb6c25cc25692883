use std::sync::Arc;

use bytes::Bytes;
use emigate_error::BrokerError;
use serde::Serialize;
use tracing::{info, warn};

use super::{
    envelope::{ATTR_CORRELATION_ID, ATTR_MESSAGE_ID, ATTR_REPLY_TO, ATTR_SENDER_ID, ATTR_TYPE},
    BrokerIdentity, BrokerStats, TopicCache,
};
use crate::transport::{Attributes, MessageId, Transport};

/// Необязательные параметры публикации.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Correlation id, который ставится атрибутом `correlationId`.
    pub correlation_id: Option<String>,
    /// Id сообщения, который ставится атрибутом `messageId`.
    pub message_id: Option<String>,
}

impl PublishOptions {
    /// Создаёт пустые параметры.
    ///
    /// # Возвращает
    /// Параметры без correlation id и message id. Ожидание ответа в этом
    /// случае идёт по id, который назначит транспорт.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlation_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn message_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Сериализует payload и публикует его в топик с метаданными брокера.
pub struct Publisher<T: Transport> {
    transport: Arc<T>,
    topics: Arc<TopicCache<T>>,
    identity: BrokerIdentity,
    reply_to: Arc<str>,
    stats: Arc<BrokerStats>,
}

impl<T: Transport> Publisher<T> {
    pub fn new(
        transport: Arc<T>,
        topics: Arc<TopicCache<T>>,
        identity: BrokerIdentity,
        reply_to: impl Into<Arc<str>>,
        stats: Arc<BrokerStats>,
    ) -> Self {
        Self {
            transport,
            topics,
            identity,
            reply_to: reply_to.into(),
            stats,
        }
    }

    /// Публикует `data` в `topic` с атрибутами отправителя, типа и топика
    /// ответов.
    ///
    /// # Возвращает
    /// - `Ok(id)`: id, назначенный транспортом;
    /// - `Err(BrokerError::TopicResolution)`: топик не удалось разрешить;
    /// - `Err(BrokerError::Serialization)`: payload не сериализуется в JSON;
    /// - `Err(BrokerError::Publish)`: транспорт отклонил публикацию.
    pub async fn publish<P>(
        &self,
        topic: &str,
        message_type: &str,
        data: &P,
        options: &PublishOptions,
    ) -> Result<MessageId, BrokerError>
    where
        P: Serialize + Sync + ?Sized,
    {
        let handle = self.topics.resolve(topic).await?;

        let body = serde_json::to_vec(data).map_err(|e| BrokerError::Serialization {
            reason: e.to_string(),
        })?;
        let attributes = self.attributes(message_type, options);

        match self
            .transport
            .publish(&handle, Bytes::from(body), attributes)
            .await
        {
            Ok(id) => {
                self.stats.record_published();
                info!(
                    topic,
                    message_type,
                    message_id = %id,
                    correlation_id = options.correlation_id.as_deref(),
                    "Message published"
                );
                Ok(id)
            }
            Err(e) => {
                self.stats.record_publish_failure();
                warn!(topic, message_type, error = %e, "Publish failed");
                Err(BrokerError::publish(topic, &e))
            }
        }
    }

    fn attributes(
        &self,
        message_type: &str,
        options: &PublishOptions,
    ) -> Attributes {
        let mut attributes = Attributes::with_capacity(5);
        attributes.insert(ATTR_SENDER_ID.to_string(), self.identity.to_string());
        attributes.insert(ATTR_TYPE.to_string(), message_type.to_string());
        attributes.insert(ATTR_REPLY_TO.to_string(), self.reply_to.to_string());
        if let Some(id) = &options.correlation_id {
            attributes.insert(ATTR_CORRELATION_ID.to_string(), id.clone());
        }
        if let Some(id) = &options.message_id {
            attributes.insert(ATTR_MESSAGE_ID.to_string(), id.clone());
        }
        attributes
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
