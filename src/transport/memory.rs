use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use emigate_error::TransportError;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace};

use super::{
    intern_topic, AckHandle, Attributes, InboundMessage, MessageHandler, MessageId, Transport,
    TransportSubscription,
};

/// Дескриптор топика внутрипроцессного транспорта.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryTopic {
    name: Arc<str>,
}

impl MemoryTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Внутрипроцессный транспорт publish/subscribe.
///
/// Ведёт себя как облачный бэкенд в миниатюре:
/// - топик нужно создать до публикации и до создания подписок;
/// - каждая подписка получает свою копию сообщения;
/// - пока обработчик не подключён, сообщения копятся в подписке;
/// - id сообщений назначаются последовательно.
///
/// Для тестов есть счётчики вызовов и управляемые сбои. Историю публикаций
/// и подтверждений транспорт хранит только в режиме записи
/// ([`InMemoryTransport::recording`]), иначе память не растёт с числом
/// сообщений.
pub struct InMemoryTransport {
    /// Топик → подписки на него
    topics: DashMap<Arc<str>, Vec<Arc<MemorySubscription>>>,
    /// Подписки по имени (имена уникальны в пределах транспорта)
    subscriptions: DashMap<String, Arc<MemorySubscription>>,
    /// История публикаций по топикам, только в режиме записи
    history: DashMap<Arc<str>, Vec<InboundMessage>>,
    next_id: AtomicU64,
    /// Журнал подтверждений, только в режиме записи
    acked: Option<Arc<Mutex<Vec<MessageId>>>>,
    faults: Arc<Faults>,
    exists_calls: AtomicUsize,
    create_calls: AtomicUsize,
    publish_calls: AtomicUsize,
}

/// Управляемые сбои транспорта.
#[derive(Default)]
struct Faults {
    topic_checks: AtomicBool,
    topic_creation: AtomicBool,
    publishes: AtomicBool,
    create_conflict: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    subscriptions: DashSet<String>,
    detach: DashSet<String>,
}

impl InMemoryTransport {
    /// Создаёт транспорт без записи истории.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Создаёт транспорт, который запоминает каждую публикацию и каждое
    /// подтверждение.
    ///
    /// # Возвращает
    /// Транспорт, для которого [`InMemoryTransport::published`] и
    /// [`InMemoryTransport::acked`] возвращают полную историю.
    pub fn recording() -> Self {
        Self::build(true)
    }

    pub fn is_recording(&self) -> bool {
        self.acked.is_some()
    }

    fn build(recording: bool) -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            history: DashMap::new(),
            next_id: AtomicU64::new(1),
            acked: recording.then(|| Arc::new(Mutex::new(Vec::new()))),
            faults: Arc::new(Faults::default()),
            exists_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
        }
    }

    /// Создаёт топик в обход счётчиков и сбоев. Повторный вызов ничего не
    /// меняет.
    pub fn seed_topic(
        &self,
        name: &str,
    ) {
        self.topics.entry(intern_topic(name)).or_default();
    }

    pub fn has_topic(
        &self,
        name: &str,
    ) -> bool {
        self.topics.contains_key(name)
    }

    /// Публикует сообщение от имени другого участника. Сбои публикации на
    /// этот путь не действуют.
    pub fn publish_raw(
        &self,
        topic: &str,
        data: impl Into<Bytes>,
        attributes: Attributes,
    ) -> Result<MessageId, TransportError> {
        self.deliver(&intern_topic(topic), data.into(), attributes)
    }

    /// Все сообщения, опубликованные в топик, в порядке публикации. Без
    /// режима записи список всегда пуст.
    pub fn published(
        &self,
        topic: &str,
    ) -> Vec<InboundMessage> {
        self.history
            .get(topic)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Id подтверждённых сообщений в порядке подтверждения. Без режима
    /// записи список всегда пуст.
    pub fn acked(&self) -> Vec<MessageId> {
        self.acked
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    // Управляемые сбои

    pub fn fail_topic_checks(
        &self,
        on: bool,
    ) {
        self.faults.topic_checks.store(on, Ordering::SeqCst);
    }

    pub fn fail_topic_creation(
        &self,
        on: bool,
    ) {
        self.faults.topic_creation.store(on, Ordering::SeqCst);
    }

    pub fn fail_publishes(
        &self,
        on: bool,
    ) {
        self.faults.publishes.store(on, Ordering::SeqCst);
    }

    /// Создание топика сохраняет топик, но отвечает `AlreadyExists`, как
    /// будто гонку выиграл другой процесс.
    pub fn inject_create_conflict(
        &self,
        on: bool,
    ) {
        self.faults.create_conflict.store(on, Ordering::SeqCst);
    }

    /// Задержка перед созданием топика.
    pub fn set_create_delay(
        &self,
        delay: Option<Duration>,
    ) {
        *self.faults.create_delay.lock() = delay;
    }

    /// Создание подписки с этим именем завершится ошибкой.
    pub fn fail_subscription(
        &self,
        name: &str,
        on: bool,
    ) {
        if on {
            self.faults.subscriptions.insert(name.to_string());
        } else {
            self.faults.subscriptions.remove(name);
        }
    }

    /// Отключение обработчика этой подписки завершится ошибкой.
    pub fn fail_detach(
        &self,
        name: &str,
        on: bool,
    ) {
        if on {
            self.faults.detach.insert(name.to_string());
        } else {
            self.faults.detach.remove(name);
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////

    fn deliver(
        &self,
        topic: &Arc<str>,
        data: Bytes,
        attributes: Attributes,
    ) -> Result<MessageId, TransportError> {
        let subs = match self.topics.get(topic) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(TransportError::NotFound {
                    resource: topic.to_string(),
                })
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let message = InboundMessage::new(id.clone(), data, attributes);
        if self.is_recording() {
            self.history
                .entry(topic.clone())
                .or_default()
                .push(message.clone());
        }

        for sub in subs {
            let acker = Arc::new(MemoryAck {
                id: id.clone(),
                log: self.acked.clone(),
            });
            sub.enqueue(message.clone().with_acker(acker));
        }
        trace!(topic = %topic, message_id = %id, "Message delivered");
        Ok(id)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    type Topic = MemoryTopic;

    fn topic(
        &self,
        name: &str,
    ) -> MemoryTopic {
        MemoryTopic {
            name: intern_topic(name),
        }
    }

    async fn topic_exists(
        &self,
        topic: &MemoryTopic,
    ) -> Result<bool, TransportError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.topic_checks.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                reason: format!("existence check for {} failed", topic.name),
            });
        }
        Ok(self.topics.contains_key(&topic.name))
    }

    async fn create_topic(
        &self,
        topic: &MemoryTopic,
    ) -> Result<(), TransportError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.topic_creation.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                reason: format!("creation of {} is not permitted", topic.name),
            });
        }

        let delay = *self.faults.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inserted = match self.topics.entry(topic.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Vec::new());
                true
            }
        };

        if !inserted || self.faults.create_conflict.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyExists {
                resource: topic.name.to_string(),
            });
        }
        debug!(topic = %topic.name, "Topic created");
        Ok(())
    }

    async fn get_or_create_subscription(
        &self,
        topic: &MemoryTopic,
        name: &str,
    ) -> Result<Arc<dyn TransportSubscription>, TransportError> {
        if self.faults.subscriptions.contains(name) {
            return Err(TransportError::Unavailable {
                reason: format!("subscription {name} could not be created"),
            });
        }

        if let Some(existing) = self.subscriptions.get(name) {
            if existing.topic != topic.name {
                return Err(TransportError::AlreadyExists {
                    resource: name.to_string(),
                });
            }
            return Ok(existing.value().clone());
        }

        let mut subs = self
            .topics
            .get_mut(&topic.name)
            .ok_or_else(|| TransportError::NotFound {
                resource: topic.name.to_string(),
            })?;

        let sub = self
            .subscriptions
            .entry(name.to_string())
            .or_insert_with(|| {
                let sub = Arc::new(MemorySubscription::new(
                    topic.name.clone(),
                    name,
                    self.faults.clone(),
                ));
                subs.push(sub.clone());
                debug!(topic = %topic.name, subscription = name, "Subscription created");
                sub
            })
            .clone();
        Ok(sub)
    }

    async fn publish(
        &self,
        topic: &MemoryTopic,
        data: Bytes,
        attributes: Attributes,
    ) -> Result<MessageId, TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                reason: format!("publish to {} failed", topic.name),
            });
        }
        self.deliver(&topic.name, data, attributes)
    }
}

/// Подтверждение сообщения внутрипроцессного транспорта.
struct MemoryAck {
    id: MessageId,
    log: Option<Arc<Mutex<Vec<MessageId>>>>,
}

impl AckHandle for MemoryAck {
    fn ack(&self) {
        match &self.log {
            Some(log) => log.lock().push(self.id.clone()),
            None => trace!(message_id = %self.id, "Message acked"),
        }
    }
}

/// Подписка внутрипроцессного транспорта.
///
/// Сообщения лежат в неограниченной очереди. Подключённый обработчик
/// вычитывает её в отдельной задаче; при отключении очередь возвращается в
/// подписку вместе с непрочитанными сообщениями.
pub struct MemorySubscription {
    topic: Arc<str>,
    name: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
    parked: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    worker: Mutex<Option<Worker>>,
    faults: Arc<Faults>,
}

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl MemorySubscription {
    fn new(
        topic: Arc<str>,
        name: &str,
        faults: Arc<Faults>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            topic,
            name: name.to_string(),
            tx,
            parked: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            faults,
        }
    }

    fn enqueue(
        &self,
        message: InboundMessage,
    ) {
        // Получатель живёт либо в `parked`, либо в задаче обработчика.
        let _ = self.tx.send(message);
    }

    pub fn is_attached(&self) -> bool {
        self.worker.lock().is_some()
    }
}

#[async_trait]
impl TransportSubscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(
        &self,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        let mut rx = self
            .parked
            .lock()
            .take()
            .ok_or_else(|| TransportError::Rejected {
                reason: format!("subscription {} already has a handler", self.name),
            })?;

        let (stop, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    next = rx.recv() => match next {
                        Some(message) => handler(message),
                        None => break,
                    },
                }
            }
            rx
        });

        *self.worker.lock() = Some(Worker { stop, handle });
        debug!(subscription = %self.name, "Handler attached");
        Ok(())
    }

    async fn detach(&self) -> Result<(), TransportError> {
        if self.faults.detach.contains(&self.name) {
            return Err(TransportError::Unavailable {
                reason: format!("detach of {} failed", self.name),
            });
        }

        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        let _ = worker.stop.send(());
        match worker.handle.await {
            Ok(rx) => {
                *self.parked.lock() = Some(rx);
                debug!(subscription = %self.name, "Handler detached");
                Ok(())
            }
            Err(e) => Err(TransportError::Unavailable {
                reason: format!("handler of {} terminated abnormally: {e}", self.name),
            }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
