use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use emigate_error::BrokerError;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use super::Envelope;

/// Внутрипроцессная шина входящих сообщений.
///
/// Каждое опубликованное в шину сообщение получают все слушатели,
/// зарегистрированные до публикации. Слушатели независимы: каждый
/// применяет свой фильтр и ничего не забирает у остальных.
///
/// У каждого слушателя своя неограниченная очередь, поэтому поток
/// сообщений одного топика не вытесняет из очереди ответ другого.
/// Слушатель удаляется из реестра при уничтожении.
pub struct BroadcastChannel {
    registry: Arc<Registry>,
}

struct Registry {
    listeners: DashMap<u64, Slot>,
    next_id: AtomicU64,
    /// `true` после закрытия шины
    closed: RwLock<bool>,
    /// Размер очереди слушателя, при котором пишется предупреждение
    backlog_warning: usize,
}

struct Slot {
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
    backlog: Arc<AtomicUsize>,
}

impl BroadcastChannel {
    /// Создаёт шину.
    ///
    /// # Аргументы
    /// * `capacity` - размер очереди слушателя, после которого шина
    ///   предупреждает об отставании. Сообщения при этом не теряются.
    ///
    /// # Возвращает
    /// Открытую шину без слушателей.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: RwLock::new(false),
                backlog_warning: capacity.max(1),
            }),
        }
    }

    /// Раздаёт сообщение всем слушателям.
    ///
    /// # Возвращает
    /// Число слушателей, получивших сообщение. Отсутствие слушателей
    /// ошибкой не является, после закрытия шины возвращается 0.
    pub fn push(
        &self,
        envelope: Arc<Envelope>,
    ) -> usize {
        let closed = self.registry.closed.read();
        if *closed {
            return 0;
        }

        let mut delivered = 0;
        for slot in self.registry.listeners.iter() {
            if slot.tx.send(envelope.clone()).is_err() {
                continue;
            }
            delivered += 1;
            let backlog = slot.backlog.fetch_add(1, Ordering::Relaxed) + 1;
            if backlog == self.registry.backlog_warning {
                warn!(
                    listener = *slot.key(),
                    backlog, "Bus listener is falling behind"
                );
            }
        }
        delivered
    }

    /// Регистрирует нового слушателя.
    ///
    /// # Возвращает
    /// Слушателя, который получит всё, что попадёт в шину после этого
    /// вызова, или `BrokerError::Closed`, если шина закрыта.
    pub fn listen(&self) -> Result<Listener, BrokerError> {
        let closed = self.registry.closed.read();
        if *closed {
            return Err(BrokerError::Closed);
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        self.registry.listeners.insert(
            id,
            Slot {
                tx,
                backlog: backlog.clone(),
            },
        );

        Ok(Listener {
            id,
            rx,
            backlog,
            registry: self.registry.clone(),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.len()
    }

    /// Закрывает шину: слушатели дочитывают свои очереди и завершаются.
    pub fn close(&self) {
        let mut closed = self.registry.closed.write();
        *closed = true;
        self.registry.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.registry.closed.read()
    }
}

/// Слушатель шины. При уничтожении снимается с регистрации.
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
    backlog: Arc<AtomicUsize>,
    registry: Arc<Registry>,
}

impl Listener {
    /// Ожидает следующее сообщение шины.
    ///
    /// # Возвращает
    /// Сообщение или `None`, если шина закрыта и очередь слушателя пуста.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        let envelope = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(envelope)
    }

    /// Забирает сообщение без ожидания.
    ///
    /// # Возвращает
    /// Сообщение, если оно уже в очереди, иначе `None`.
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        let envelope = self.rx.try_recv().ok()?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(envelope)
    }

    /// Ожидает следующее сообщение, удовлетворяющее фильтру. Остальные
    /// сообщения пропускаются.
    ///
    /// # Возвращает
    /// Подходящее сообщение или `None`, если шина закрыта.
    pub async fn recv_matching(
        &mut self,
        filter: &EnvelopeFilter,
    ) -> Option<Arc<Envelope>> {
        loop {
            let envelope = self.recv().await?;
            if filter.matches(&envelope) {
                return Some(envelope);
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.registry.listeners.remove(&self.id);
    }
}


/// Предикат слушателя. Пустой фильтр пропускает всё.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeFilter {
    topic: Option<Arc<str>>,
    correlation_id: Option<String>,
    types: Option<Vec<String>>,
    exclude_sender: Option<String>,
}

impl EnvelopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Только сообщения из данного топика.
    pub fn topic(
        mut self,
        topic: impl Into<Arc<str>>,
    ) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Только сообщения с данным correlation id.
    pub fn correlation_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Только сообщения перечисленных типов (`None` означает любой тип).
    pub fn types(
        mut self,
        types: Option<Vec<String>>,
    ) -> Self {
        self.types = types;
        self
    }

    /// Отбрасывать сообщения данного отправителя.
    pub fn exclude_sender(
        mut self,
        sender_id: impl Into<String>,
    ) -> Self {
        self.exclude_sender = Some(sender_id.into());
        self
    }

    /// # Возвращает
    /// `true`, если сообщение проходит все заданные условия.
    pub fn matches(
        &self,
        envelope: &Envelope,
    ) -> bool {
        if let Some(topic) = &self.topic {
            if envelope.source_topic != *topic {
                return false;
            }
        }
        if let Some(id) = &self.correlation_id {
            if envelope.correlation_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            match envelope.message_type.as_deref() {
                Some(t) if types.iter().any(|allowed| allowed == t) => {}
                _ => return false,
            }
        }
        if let Some(sender) = &self.exclude_sender {
            if envelope.is_from(sender) {
                return false;
            }
        }
        true
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
