//! Граница транспорта publish/subscribe.
//!
//! Ядро брокера зависит только от трейтов этого модуля:
//! - [`Transport`]: проверка/создание топиков, подписки, публикация;
//! - [`TransportSubscription`]: подключение и отключение обработчика;
//! - [`InboundMessage`]: входящее сообщение с подтверждением (`ack`).
//!
//! Адаптер к конкретному бэкенду реализует ровно эти операции. В крейте
//! есть один адаптер: [`InMemoryTransport`], внутрипроцессный бэкенд.

mod intern;
pub mod memory;
mod message;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use emigate_error::TransportError;

pub(crate) use intern::intern_topic;
pub use memory::{InMemoryTransport, MemorySubscription, MemoryTopic};
pub use message::{AckHandle, Attributes, InboundMessage, MessageId};

/// Обработчик входящих сообщений подписки.
///
/// Вызывается последовательно, в порядке доставки транспортом.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Транспорт publish/subscribe, поверх которого работает брокер.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Локальный дескриптор топика. Создание дескриптора не обращается к
    /// бэкенду.
    type Topic: Clone + Send + Sync + 'static;

    /// Строит дескриптор топика по имени.
    fn topic(
        &self,
        name: &str,
    ) -> Self::Topic;

    /// Существует ли топик на бэкенде.
    async fn topic_exists(
        &self,
        topic: &Self::Topic,
    ) -> Result<bool, TransportError>;

    /// Создаёт топик. Если он уже есть, возвращает
    /// [`TransportError::AlreadyExists`].
    async fn create_topic(
        &self,
        topic: &Self::Topic,
    ) -> Result<(), TransportError>;

    /// Возвращает подписку с данным именем, создавая её при необходимости.
    async fn get_or_create_subscription(
        &self,
        topic: &Self::Topic,
        name: &str,
    ) -> Result<Arc<dyn TransportSubscription>, TransportError>;

    /// Публикует тело с атрибутами, возвращает id, назначенный транспортом.
    async fn publish(
        &self,
        topic: &Self::Topic,
        data: Bytes,
        attributes: Attributes,
    ) -> Result<MessageId, TransportError>;
}

/// Подписка на топик.
#[async_trait]
pub trait TransportSubscription: Send + Sync {
    fn topic(&self) -> &str;

    fn name(&self) -> &str;

    /// Подключает обработчик. С этого момента транспорт доставляет ему
    /// сообщения подписки.
    async fn attach(
        &self,
        handler: MessageHandler,
    ) -> Result<(), TransportError>;

    /// Отключает обработчик. Недоставленные сообщения остаются в подписке.
    async fn detach(&self) -> Result<(), TransportError>;
}
