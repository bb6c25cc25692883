//! Фасад брокера request/reply.
//!
//! Трейт [`Broker`] описывает операции, доступные остальному шлюзу:
//! - `forward`: опубликовать сообщение без ожидания ответа;
//! - `forward_and_get_reply`: опубликовать и дождаться ответа;
//! - `wait_for_reply`: дождаться ответа по известному correlation id;
//! - `get_events` / `get_materialized_view_updates`: потоки событий;
//! - `disconnect`: остановить брокер.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use emigate_error::BrokerError;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    BindReport, Binding, BroadcastChannel, BrokerIdentity, BrokerStats, EnvelopeFilter,
    EventStream, PublishOptions, Publisher, ReplyClaim, ReplyListener, ReplyRouter, RequestState,
    StatsSnapshot, SubscriptionManager, TopicCache,
};
use crate::{config::BrokerConfig, transport::MessageId, transport::Transport};

/// Операции брокера request/reply.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Идентификатор отправителя, который ставится на исходящие сообщения.
    fn sender_id(&self) -> &str;

    /// Публикует сообщение и не ждёт ответа.
    ///
    /// # Возвращает
    /// Id, назначенный транспортом, или ошибку публикации. После
    /// `disconnect` возвращает `BrokerError::Closed`.
    async fn forward(
        &self,
        topic: &str,
        message_type: &str,
        payload: &Value,
        options: PublishOptions,
    ) -> Result<MessageId, BrokerError>;

    /// Публикует сообщение и ждёт ответ с correlation id, равным
    /// `options.correlation_id` или, если он не задан, id опубликованного
    /// сообщения. `timeout = None` означает таймаут из конфигурации.
    /// Таймаут отсчитывается после успешной публикации.
    ///
    /// # Возвращает
    /// - `Ok(payload)`: payload первого подходящего ответа как есть;
    /// - `Err(BrokerError::Timeout)`: ответа не было до дедлайна;
    /// - `Err(BrokerError::DuplicateWait)`: этот correlation id уже ждут;
    /// - ошибку публикации, если запрос не ушёл.
    async fn forward_and_get_reply(
        &self,
        topic: &str,
        message_type: &str,
        payload: &Value,
        timeout: Option<Duration>,
        exclude_self: bool,
        options: PublishOptions,
    ) -> Result<Value, BrokerError>;

    /// Ждёт ответ с данным correlation id в топике ответов.
    ///
    /// # Возвращает
    /// Payload ответа, `BrokerError::Timeout` по дедлайну или
    /// `BrokerError::Closed`, если брокер остановлен во время ожидания.
    async fn wait_for_reply(
        &self,
        correlation_id: &str,
        timeout: Option<Duration>,
        exclude_self: bool,
    ) -> Result<Value, BrokerError>;

    /// Открывает поток сообщений топика событий, опционально только
    /// указанных типов.
    ///
    /// # Возвращает
    /// Бесконечный поток, который видит сообщения начиная с момента
    /// вызова, или `BrokerError::Closed` после `disconnect`.
    fn get_events(
        &self,
        types: Option<Vec<String>>,
        exclude_self: bool,
    ) -> Result<EventStream, BrokerError>;

    /// Поток сообщений топика обновлений materialized view.
    fn get_materialized_view_updates(
        &self,
        types: Option<Vec<String>>,
        exclude_self: bool,
    ) -> Result<EventStream, BrokerError>;

    /// Останавливает брокер: отсоединяет подписки и закрывает шину.
    ///
    /// # Возвращает
    /// `Ok(())` или `BrokerError::Disconnect` со списком подписок, которые
    /// не удалось отсоединить. Повторный вызов дочищает их.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    fn stats(&self) -> StatsSnapshot;
}

/// Брокер поверх транспорта publish/subscribe.
pub struct PubSubBroker<T: Transport> {
    config: BrokerConfig,
    identity: BrokerIdentity,
    topics: Arc<TopicCache<T>>,
    publisher: Publisher<T>,
    bus: Arc<BroadcastChannel>,
    replies: ReplyRouter,
    subscriptions: SubscriptionManager<T>,
    stats: Arc<BrokerStats>,
    bind_report: BindReport,
    closed: AtomicBool,
}

impl<T: Transport> PubSubBroker<T> {
    /// Создаёт брокер и поднимает подписки на топики ответов, событий и
    /// обновлений.
    ///
    /// # Аргументы
    /// * `config` - имена топиков и подписок, таймаут по умолчанию.
    /// * `transport` - бэкенд publish/subscribe.
    ///
    /// # Возвращает
    /// Готовый брокер. Сбой отдельной подписки не мешает созданию брокера,
    /// итог доступен через [`PubSubBroker::bind_report`].
    pub async fn connect(
        config: BrokerConfig,
        transport: Arc<T>,
    ) -> Self {
        let identity = BrokerIdentity::generate();
        let stats = Arc::new(BrokerStats::default());
        let topics = Arc::new(TopicCache::new(transport.clone()));
        let bus = Arc::new(BroadcastChannel::new(config.channel_capacity));

        let publisher = Publisher::new(
            transport.clone(),
            topics.clone(),
            identity.clone(),
            config.replies_topic.as_str(),
            stats.clone(),
        );
        let replies = ReplyRouter::new(
            bus.clone(),
            config.replies_topic.as_str(),
            identity.clone(),
            stats.clone(),
        );
        let subscriptions =
            SubscriptionManager::new(transport, topics.clone(), bus.clone(), stats.clone());

        let bindings = [
            Binding::new(&config.replies_topic, &config.replies_subscription),
            Binding::new(&config.events_topic, &config.events_subscription),
            Binding::new(
                &config.materialized_view_updates_topic,
                &config.materialized_view_updates_subscription,
            ),
        ];
        let bind_report = subscriptions.bind_all(&bindings).await;

        info!(
            sender_id = %identity,
            active = bind_report.active.len(),
            failed = bind_report.failed.len(),
            "Broker connected"
        );

        Self {
            config,
            identity,
            topics,
            publisher,
            bus,
            replies,
            subscriptions,
            stats,
            bind_report,
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn bind_report(&self) -> &BindReport {
        &self.bind_report
    }

    pub fn topics(&self) -> &TopicCache<T> {
        &self.topics
    }

    /// Число активных ожиданий ответа.
    pub fn pending_replies(&self) -> usize {
        self.replies.pending()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn stream(
        &self,
        topic: &str,
        types: Option<Vec<String>>,
        exclude_self: bool,
    ) -> Result<EventStream, BrokerError> {
        self.ensure_open()?;
        let listener = self.bus.listen()?;
        let mut filter = EnvelopeFilter::new().topic(topic).types(types);
        if exclude_self {
            filter = filter.exclude_sender(self.identity.as_str());
        }
        debug!(topic, "Event stream opened");
        Ok(EventStream::new(listener, filter))
    }
}

/// Слушатель ответов до или после привязки к correlation id.
enum Awaiting {
    Claimed(ReplyClaim),
    Unclaimed(ReplyListener),
}

#[async_trait]
impl<T: Transport> Broker for PubSubBroker<T> {
    fn sender_id(&self) -> &str {
        self.identity.as_str()
    }

    async fn forward(
        &self,
        topic: &str,
        message_type: &str,
        payload: &Value,
        options: PublishOptions,
    ) -> Result<MessageId, BrokerError> {
        self.ensure_open()?;
        self.publisher
            .publish(topic, message_type, payload, &options)
            .await
    }

    async fn forward_and_get_reply(
        &self,
        topic: &str,
        message_type: &str,
        payload: &Value,
        timeout: Option<Duration>,
        exclude_self: bool,
        options: PublishOptions,
    ) -> Result<Value, BrokerError> {
        self.ensure_open()?;
        let timeout = timeout.unwrap_or(self.config.reply_timeout);
        debug!(topic, message_type, state = %RequestState::Init, "Request started");

        // Слушатель регистрируется до публикации, иначе быстрый ответ
        // может прийти раньше, чем его начнут ждать. Таймаут отсчитывается
        // только после публикации.
        let listener = self.replies.listen(exclude_self)?;
        let awaiting = match &options.correlation_id {
            Some(id) => Awaiting::Claimed(listener.claim(id.clone())?),
            None => Awaiting::Unclaimed(listener),
        };

        debug!(topic, message_type, state = %RequestState::Publishing, "Publishing request");
        let message_id = match self
            .publisher
            .publish(topic, message_type, payload, &options)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                debug!(topic, state = %RequestState::PublishFailed, error = %e, "Request failed");
                return Err(e);
            }
        };

        let claim = match awaiting {
            Awaiting::Claimed(claim) => claim,
            Awaiting::Unclaimed(listener) => listener.claim(message_id)?,
        };
        claim.arm(timeout).wait().await
    }

    async fn wait_for_reply(
        &self,
        correlation_id: &str,
        timeout: Option<Duration>,
        exclude_self: bool,
    ) -> Result<Value, BrokerError> {
        self.ensure_open()?;
        let timeout = timeout.unwrap_or(self.config.reply_timeout);
        self.replies
            .listen(exclude_self)?
            .expect(correlation_id, timeout)?
            .wait()
            .await
    }

    fn get_events(
        &self,
        types: Option<Vec<String>>,
        exclude_self: bool,
    ) -> Result<EventStream, BrokerError> {
        self.stream(&self.config.events_topic, types, exclude_self)
    }

    fn get_materialized_view_updates(
        &self,
        types: Option<Vec<String>>,
        exclude_self: bool,
    ) -> Result<EventStream, BrokerError> {
        self.stream(
            &self.config.materialized_view_updates_topic,
            types,
            exclude_self,
        )
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        let result = self.subscriptions.detach_all().await;
        self.bus.close();

        match &result {
            Ok(()) => info!(sender_id = %self.identity, "Broker disconnected"),
            Err(e) => error!(sender_id = %self.identity, error = %e, "Broker disconnect incomplete"),
        }
        if !self.bind_report.is_complete() {
            warn!(
                failed = self.bind_report.failed.len(),
                "Some subscriptions were never bound"
            );
        }
        result
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::InMemoryTransport;

    async fn connect() -> (Arc<InMemoryTransport>, PubSubBroker<InMemoryTransport>) {
        let transport = Arc::new(InMemoryTransport::recording());
        let broker = PubSubBroker::connect(BrokerConfig::default(), transport.clone()).await;
        (transport, broker)
    }

    /// Тест проверяет, что connect поднимает три подписки и создаёт топики.
    #[tokio::test]
    async fn test_connect_binds_gateway_topics() {
        let (transport, broker) = connect().await;
        assert!(broker.bind_report().is_complete());
        assert_eq!(broker.bind_report().active.len(), 3);
        assert!(transport.has_topic("emi-gateway-replies"));
        assert!(transport.has_topic("emi-gateway-events"));
        assert!(transport.has_topic("emi-gateway-materialized-view-updates"));
        assert_eq!(broker.topics().cached_len(), 3);
    }

    /// Тест проверяет, что forward ставит sender id брокера.
    #[tokio::test]
    async fn test_forward_uses_own_sender_id() {
        let (transport, broker) = connect().await;
        let id = broker
            .forward("orders", "CreateOrder", &json!({"qty": 1}), PublishOptions::default())
            .await
            .unwrap();

        let msg = &transport.published("orders")[0];
        assert_eq!(msg.id, id);
        assert_eq!(msg.attribute(crate::broker::ATTR_SENDER_ID), Some(broker.sender_id()));
        assert_eq!(broker.stats().published, 1);
    }

    /// Тест проверяет, что после disconnect все операции возвращают Closed,
    /// а повторный disconnect успешен.
    #[tokio::test]
    async fn test_operations_fail_after_disconnect() {
        let (_transport, broker) = connect().await;
        broker.disconnect().await.unwrap();
        assert!(broker.is_closed());

        let err = broker
            .forward("orders", "X", &json!({}), PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
        assert!(matches!(
            broker.wait_for_reply("c", None, true).await,
            Err(BrokerError::Closed)
        ));
        assert!(matches!(broker.get_events(None, true), Err(BrokerError::Closed)));

        broker.disconnect().await.unwrap();
    }

    /// Тест проверяет, что сбой публикации освобождает заранее занятый
    /// correlation id.
    #[tokio::test]
    async fn test_publish_failure_releases_claim() {
        let (transport, broker) = connect().await;
        transport.fail_publishes(true);

        let err = broker
            .forward_and_get_reply(
                "orders",
                "X",
                &json!({}),
                None,
                true,
                PublishOptions::new().correlation_id("c-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Publish { .. }));
        assert_eq!(broker.pending_replies(), 0);
    }
}
