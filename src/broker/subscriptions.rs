use std::{collections::HashMap, fmt, sync::Arc};

use emigate_error::BrokerError;
use tokio::{
    sync::Mutex,
    task::{self, JoinSet},
};
use tracing::{error, info, trace, warn};

use super::{BroadcastChannel, BrokerStats, Envelope, TopicCache};
use crate::transport::{intern_topic, InboundMessage, MessageHandler, Transport, TransportSubscription};

/// Пара «топик / подписка», которую слушает брокер.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub topic: String,
    pub subscription: String,
}

impl Binding {
    pub fn new(
        topic: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }
}

impl Binding {
    fn setup_error(
        &self,
        reason: String,
    ) -> BrokerError {
        BrokerError::SubscriptionSetup {
            topic: self.topic.clone(),
            subscription: self.subscription.clone(),
            reason,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.subscription)
    }
}

/// Итог `bind_all`: какие привязки поднялись, какие нет.
#[derive(Debug, Default)]
pub struct BindReport {
    pub active: Vec<Binding>,
    pub failed: Vec<(Binding, BrokerError)>,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Поднимает подписки и переносит их сообщения в шину.
///
/// Обработчик каждой подписки декодирует сообщение, публикует конверт в
/// шину и только потом подтверждает сообщение. Недекодируемое сообщение
/// отбрасывается с предупреждением, но тоже подтверждается: повторная
/// доставка его не исправит.
pub struct SubscriptionManager<T: Transport> {
    ctx: BindContext<T>,
    active: Mutex<Vec<ActiveBinding>>,
}

struct ActiveBinding {
    binding: Binding,
    subscription: Arc<dyn TransportSubscription>,
}

impl<T: Transport> SubscriptionManager<T> {
    pub fn new(
        transport: Arc<T>,
        topics: Arc<TopicCache<T>>,
        bus: Arc<BroadcastChannel>,
        stats: Arc<BrokerStats>,
    ) -> Self {
        Self {
            ctx: BindContext {
                transport,
                topics,
                bus,
                stats,
            },
            active: Mutex::new(Vec::new()),
        }
    }

    /// Поднимает все привязки конкурентно. Сбой одной привязки не мешает
    /// остальным.
    ///
    /// # Возвращает
    /// Отчёт, в котором каждая привязка попадает ровно в один из списков:
    /// `active` или `failed`. Паника задачи, поднимающей привязку, тоже
    /// считается сбоем этой привязки.
    pub async fn bind_all(
        &self,
        bindings: &[Binding],
    ) -> BindReport {
        let mut set = JoinSet::new();
        let mut tasks: HashMap<task::Id, (usize, Binding)> = HashMap::with_capacity(bindings.len());
        for (index, binding) in bindings.iter().cloned().enumerate() {
            let ctx = self.ctx.clone();
            let task_binding = binding.clone();
            let handle = set.spawn(async move { ctx.bind(&task_binding).await });
            tasks.insert(handle.id(), (index, binding));
        }

        let mut bound = Vec::with_capacity(bindings.len());
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some((index, binding)) = tasks.remove(&id) else {
                continue;
            };
            let result = outcome
                .unwrap_or_else(|e| Err(binding.setup_error(format!("setup task failed: {e}"))));
            match result {
                Ok(subscription) => bound.push((index, binding, subscription)),
                Err(e) => {
                    error!(binding = %binding, error = %e, "Subscription setup failed");
                    failed.push((index, binding, e));
                }
            }
        }
        bound.sort_by_key(|(index, ..)| *index);
        failed.sort_by_key(|(index, ..)| *index);

        let mut report = BindReport::default();
        let mut active = self.active.lock().await;
        for (_, binding, subscription) in bound {
            report.active.push(binding.clone());
            active.push(ActiveBinding {
                binding,
                subscription,
            });
        }
        report.failed = failed.into_iter().map(|(_, b, e)| (b, e)).collect();
        report
    }

    /// Отсоединяет обработчики всех активных привязок.
    ///
    /// Пытается отсоединить каждую; неудачные остаются в списке для
    /// повторной попытки и перечисляются в [`BrokerError::Disconnect`].
    pub async fn detach_all(&self) -> Result<(), BrokerError> {
        let mut active = self.active.lock().await;
        let mut kept = Vec::new();
        let mut failed = Vec::new();

        for entry in active.drain(..) {
            match entry.subscription.detach().await {
                Ok(()) => info!(binding = %entry.binding, "Subscription detached"),
                Err(e) => {
                    error!(binding = %entry.binding, error = %e, "Failed to detach subscription");
                    failed.push(entry.binding.to_string());
                    kept.push(entry);
                }
            }
        }
        *active = kept;

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Disconnect { failed })
        }
    }

    pub async fn active_bindings(&self) -> Vec<Binding> {
        self.active
            .lock()
            .await
            .iter()
            .map(|entry| entry.binding.clone())
            .collect()
    }
}

/// Всё, что нужно задаче, поднимающей одну привязку.
struct BindContext<T: Transport> {
    transport: Arc<T>,
    topics: Arc<TopicCache<T>>,
    bus: Arc<BroadcastChannel>,
    stats: Arc<BrokerStats>,
}

impl<T: Transport> Clone for BindContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            topics: self.topics.clone(),
            bus: self.bus.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T: Transport> BindContext<T> {
    async fn bind(
        &self,
        binding: &Binding,
    ) -> Result<Arc<dyn TransportSubscription>, BrokerError> {
        let setup_error = |reason: String| binding.setup_error(reason);

        let topic = self
            .topics
            .resolve(&binding.topic)
            .await
            .map_err(|e| setup_error(e.to_string()))?;
        let subscription = self
            .transport
            .get_or_create_subscription(&topic, &binding.subscription)
            .await
            .map_err(|e| setup_error(e.to_string()))?;
        subscription
            .attach(self.handler(&binding.topic))
            .await
            .map_err(|e| setup_error(e.to_string()))?;

        info!(binding = %binding, "Subscription bound");
        Ok(subscription)
    }

    fn handler(
        &self,
        topic: &str,
    ) -> MessageHandler {
        let source = intern_topic(topic);
        let bus = self.bus.clone();
        let stats = self.stats.clone();

        Arc::new(move |message: InboundMessage| {
            match Envelope::decode(source.clone(), &message) {
                Ok(envelope) => {
                    stats.record_received();
                    let listeners = bus.push(Arc::new(envelope));
                    trace!(topic = %source, message_id = %message.id, listeners, "Message dispatched");
                }
                Err(e) => {
                    stats.record_malformed();
                    warn!(error = %e, "Dropping malformed message");
                }
            }
            message.ack();
            stats.record_acked();
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::transport::{Attributes, InMemoryTransport};

    /// Транспорт, у которого создание подписки с заданным именем паникует.
    struct PanickingTransport {
        inner: InMemoryTransport,
        panic_on: &'static str,
    }

    #[async_trait::async_trait]
    impl Transport for PanickingTransport {
        type Topic = <InMemoryTransport as Transport>::Topic;

        fn topic(
            &self,
            name: &str,
        ) -> Self::Topic {
            self.inner.topic(name)
        }

        async fn topic_exists(
            &self,
            topic: &Self::Topic,
        ) -> Result<bool, emigate_error::TransportError> {
            self.inner.topic_exists(topic).await
        }

        async fn create_topic(
            &self,
            topic: &Self::Topic,
        ) -> Result<(), emigate_error::TransportError> {
            self.inner.create_topic(topic).await
        }

        async fn get_or_create_subscription(
            &self,
            topic: &Self::Topic,
            name: &str,
        ) -> Result<Arc<dyn TransportSubscription>, emigate_error::TransportError> {
            if name == self.panic_on {
                panic!("subscription backend crashed");
            }
            self.inner.get_or_create_subscription(topic, name).await
        }

        async fn publish(
            &self,
            topic: &Self::Topic,
            data: bytes::Bytes,
            attributes: Attributes,
        ) -> Result<crate::transport::MessageId, emigate_error::TransportError> {
            self.inner.publish(topic, data, attributes).await
        }
    }

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        bus: Arc<BroadcastChannel>,
        stats: Arc<BrokerStats>,
        manager: SubscriptionManager<InMemoryTransport>,
    }

    fn setup() -> Fixture {
        let transport = Arc::new(InMemoryTransport::recording());
        let topics = Arc::new(TopicCache::new(transport.clone()));
        let bus = Arc::new(BroadcastChannel::new(16));
        let stats = Arc::new(BrokerStats::default());
        let manager =
            SubscriptionManager::new(transport.clone(), topics, bus.clone(), stats.clone());
        Fixture {
            transport,
            bus,
            stats,
            manager,
        }
    }

    async fn next(listener: &mut crate::broker::Listener) -> Arc<Envelope> {
        timeout(Duration::from_millis(500), listener.recv())
            .await
            .expect("timed out")
            .expect("bus closed")
    }

    #[test]
    fn test_binding_display() {
        let binding = Binding::new("emi-gateway-replies", "emi-gateway-replies-subscription");
        assert_eq!(
            binding.to_string(),
            "emi-gateway-replies/emi-gateway-replies-subscription"
        );
    }

    /// Тест проверяет, что привязка создаёт топик и подписку, а входящие
    /// сообщения попадают в шину и подтверждаются.
    #[tokio::test]
    async fn test_bound_messages_reach_bus_and_are_acked() {
        let fx = setup();
        let report = fx
            .manager
            .bind_all(&[Binding::new("events", "events-sub")])
            .await;
        assert!(report.is_complete());
        assert!(fx.transport.has_topic("events"));

        let mut listener = fx.bus.listen().unwrap();
        let id = fx
            .transport
            .publish_raw("events", r#"{"n":1}"#, Attributes::new())
            .unwrap();

        let envelope = next(&mut listener).await;
        assert_eq!(&*envelope.source_topic, "events");
        assert_eq!(envelope.message_id, id);
        assert_eq!(envelope.payload, json!({"n": 1}));

        // ack идёт после публикации в шину
        tokio::task::yield_now().await;
        assert_eq!(fx.transport.acked(), vec![id]);
        assert_eq!(fx.stats.snapshot().received, 1);
    }

    /// Тест проверяет, что недекодируемое сообщение подтверждается и не
    /// мешает следующим.
    #[tokio::test]
    async fn test_malformed_message_does_not_stop_handler() {
        let fx = setup();
        fx.manager.bind_all(&[Binding::new("events", "events-sub")]).await;
        let mut listener = fx.bus.listen().unwrap();

        let bad = fx
            .transport
            .publish_raw("events", "not json", Attributes::new())
            .unwrap();
        let good = fx
            .transport
            .publish_raw("events", "[1]", Attributes::new())
            .unwrap();

        let envelope = next(&mut listener).await;
        assert_eq!(envelope.message_id, good);
        tokio::task::yield_now().await;

        let acked = fx.transport.acked();
        assert!(acked.contains(&bad));
        assert!(acked.contains(&good));
        let snap = fx.stats.snapshot();
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.received, 1);
    }

    /// Тест проверяет, что сбой одной привязки не мешает остальным.
    #[tokio::test]
    async fn test_failed_binding_is_isolated() {
        let fx = setup();
        fx.transport.fail_subscription("broken-sub", true);

        let report = fx
            .manager
            .bind_all(&[
                Binding::new("replies", "replies-sub"),
                Binding::new("broken", "broken-sub"),
                Binding::new("events", "events-sub"),
            ])
            .await;

        assert_eq!(
            report.active,
            vec![
                Binding::new("replies", "replies-sub"),
                Binding::new("events", "events-sub"),
            ]
        );
        assert_eq!(report.failed.len(), 1);
        let (binding, err) = &report.failed[0];
        assert_eq!(binding.subscription, "broken-sub");
        assert!(matches!(err, BrokerError::SubscriptionSetup { .. }));

        let mut listener = fx.bus.listen().unwrap();
        fx.transport.publish_raw("events", "{}", Attributes::new()).unwrap();
        assert_eq!(&*next(&mut listener).await.source_topic, "events");
    }

    /// Тест проверяет, что паника задачи привязки не теряет привязку:
    /// она попадает в `failed`, и отчёт не считается полным.
    #[tokio::test]
    async fn test_panicked_setup_is_reported_as_failed() {
        let transport = Arc::new(PanickingTransport {
            inner: InMemoryTransport::new(),
            panic_on: "crash-sub",
        });
        let topics = Arc::new(TopicCache::new(transport.clone()));
        let bus = Arc::new(BroadcastChannel::new(16));
        let manager =
            SubscriptionManager::new(transport, topics, bus, Arc::new(BrokerStats::default()));

        let report = manager
            .bind_all(&[
                Binding::new("ok", "ok-sub"),
                Binding::new("crash", "crash-sub"),
            ])
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.active, vec![Binding::new("ok", "ok-sub")]);
        assert_eq!(report.failed.len(), 1);
        let (binding, err) = &report.failed[0];
        assert_eq!(binding, &Binding::new("crash", "crash-sub"));
        match err {
            BrokerError::SubscriptionSetup { reason, .. } => {
                assert!(reason.starts_with("setup task failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.active_bindings().await, vec![Binding::new("ok", "ok-sub")]);
    }

    /// Тест проверяет, что сбой разрешения топика тоже изолирован.
    #[tokio::test]
    async fn test_topic_failure_is_setup_error() {
        let fx = setup();
        fx.transport.fail_topic_creation(true);
        let report = fx.manager.bind_all(&[Binding::new("t", "s")]).await;
        assert!(report.active.is_empty());
        assert!(matches!(
            report.failed[0].1,
            BrokerError::SubscriptionSetup { .. }
        ));
    }

    /// Тест проверяет, что неудачный detach перечисляется в ошибке, а
    /// привязка остаётся для повторной попытки.
    #[tokio::test]
    async fn test_detach_all_reports_failures_and_retries() {
        let fx = setup();
        fx.manager
            .bind_all(&[Binding::new("a", "a-sub"), Binding::new("b", "b-sub")])
            .await;
        fx.transport.fail_detach("b-sub", true);

        let err = fx.manager.detach_all().await.unwrap_err();
        match err {
            BrokerError::Disconnect { failed } => assert_eq!(failed, vec!["b/b-sub".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.manager.active_bindings().await, vec![Binding::new("b", "b-sub")]);

        fx.transport.fail_detach("b-sub", false);
        fx.manager.detach_all().await.unwrap();
        assert!(fx.manager.active_bindings().await.is_empty());
        fx.manager.detach_all().await.unwrap();
    }
}
