use std::{fmt, sync::Arc, time::Duration};

use dashmap::DashSet;
use emigate_error::BrokerError;
use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::{BroadcastChannel, BrokerIdentity, BrokerStats, EnvelopeFilter, Listener};

/// Состояние вызова request/reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Init,
    Publishing,
    AwaitingReply,
    Replied,
    TimedOut,
    PublishFailed,
}

impl fmt::Display for RequestState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Publishing => "publishing",
            Self::AwaitingReply => "awaiting_reply",
            Self::Replied => "replied",
            Self::TimedOut => "timed_out",
            Self::PublishFailed => "publish_failed",
        };
        f.write_str(s)
    }
}

/// Сопоставляет ответы из шины с ожидающими запросами.
///
/// Ответ ищется в топике ответов по correlation id. На один correlation id
/// в каждый момент допускается не больше одного ожидания.
pub struct ReplyRouter {
    bus: Arc<BroadcastChannel>,
    replies_topic: Arc<str>,
    identity: BrokerIdentity,
    pending: Arc<DashSet<String>>,
    stats: Arc<BrokerStats>,
}

impl ReplyRouter {
    pub fn new(
        bus: Arc<BroadcastChannel>,
        replies_topic: impl Into<Arc<str>>,
        identity: BrokerIdentity,
        stats: Arc<BrokerStats>,
    ) -> Self {
        Self {
            bus,
            replies_topic: replies_topic.into(),
            identity,
            pending: Arc::new(DashSet::new()),
            stats,
        }
    }

    /// Регистрирует слушателя ответов. Слушатель получает всё, что попадёт
    /// в шину после вызова, поэтому регистрировать его нужно до публикации
    /// запроса.
    pub fn listen(
        &self,
        exclude_self: bool,
    ) -> Result<ReplyListener, BrokerError> {
        let listener = self.bus.listen()?;
        let mut filter = EnvelopeFilter::new().topic(self.replies_topic.clone());
        if exclude_self {
            filter = filter.exclude_sender(self.identity.as_str());
        }
        Ok(ReplyListener {
            listener,
            filter,
            pending: self.pending.clone(),
            stats: self.stats.clone(),
        })
    }

    /// Число активных ожиданий.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn replies_topic(&self) -> &str {
        &self.replies_topic
    }
}

/// Запас, с которым ожидание считается бессрочным, если `now + timeout`
/// не помещается в `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Дедлайн через `timeout` от текущего момента без переполнения.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Слушатель топика ответов, ещё не привязанный к correlation id.
pub struct ReplyListener {
    listener: Listener,
    filter: EnvelopeFilter,
    pending: Arc<DashSet<String>>,
    stats: Arc<BrokerStats>,
}

impl ReplyListener {
    /// Занимает correlation id. Отсчёт таймаута при этом не начинается.
    ///
    /// # Возвращает
    /// Занятый correlation id или `BrokerError::DuplicateWait`, если его
    /// уже ждёт другой вызов.
    pub fn claim(
        self,
        correlation_id: impl Into<String>,
    ) -> Result<ReplyClaim, BrokerError> {
        let correlation_id = correlation_id.into();
        if !self.pending.insert(correlation_id.clone()) {
            return Err(BrokerError::DuplicateWait { correlation_id });
        }

        Ok(ReplyClaim {
            filter: self.filter.correlation_id(correlation_id.clone()),
            listener: self.listener,
            stats: self.stats,
            claim: Claim {
                correlation_id,
                pending: self.pending,
            },
        })
    }

    /// Занимает correlation id и сразу запускает отсчёт таймаута.
    ///
    /// # Возвращает
    /// Активное ожидание или `BrokerError::DuplicateWait`.
    pub fn expect(
        self,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingWait, BrokerError> {
        Ok(self.claim(correlation_id)?.arm(timeout))
    }
}

/// Занятый correlation id, для которого ещё не запущен таймаут.
///
/// Ответы, пришедшие в шину после регистрации слушателя, копятся в его
/// очереди и будут прочитаны после [`ReplyClaim::arm`].
pub struct ReplyClaim {
    listener: Listener,
    filter: EnvelopeFilter,
    stats: Arc<BrokerStats>,
    claim: Claim,
}

impl ReplyClaim {
    pub fn correlation_id(&self) -> &str {
        &self.claim.correlation_id
    }

    /// Запускает отсчёт таймаута.
    ///
    /// # Возвращает
    /// Активное ожидание с дедлайном через `timeout` от этого вызова.
    /// Слишком большой `timeout` означает ожидание без ограничения.
    pub fn arm(
        self,
        timeout: Duration,
    ) -> PendingWait {
        let correlation_id = self.claim.correlation_id.clone();
        debug!(
            correlation_id = %correlation_id,
            state = %RequestState::AwaitingReply,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for reply"
        );

        PendingWait {
            correlation_id,
            listener: self.listener,
            filter: self.filter,
            deadline: deadline_after(timeout),
            timeout,
            stats: self.stats,
            _claim: self.claim,
        }
    }
}

/// Активное ожидание ответа.
///
/// Снимается при первом подходящем ответе, по дедлайну, при закрытии шины
/// или при `drop`.
pub struct PendingWait {
    correlation_id: String,
    listener: Listener,
    filter: EnvelopeFilter,
    deadline: Instant,
    timeout: Duration,
    stats: Arc<BrokerStats>,
    _claim: Claim,
}

impl PendingWait {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Ждёт ответ до дедлайна.
    ///
    /// # Возвращает
    /// Payload ответа как есть, `BrokerError::Timeout` по дедлайну или
    /// `BrokerError::Closed`, если шина закрылась раньше.
    pub async fn wait(mut self) -> Result<Value, BrokerError> {
        match timeout_at(self.deadline, self.listener.recv_matching(&self.filter)).await {
            Ok(Some(envelope)) => {
                self.stats.record_reply_matched();
                debug!(
                    correlation_id = %self.correlation_id,
                    message_id = %envelope.message_id,
                    state = %RequestState::Replied,
                    "Reply received"
                );
                Ok(envelope.payload.clone())
            }
            Ok(None) => Err(BrokerError::Closed),
            Err(_) => {
                self.stats.record_reply_timeout();
                warn!(
                    correlation_id = %self.correlation_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    state = %RequestState::TimedOut,
                    "Reply timed out"
                );
                Err(BrokerError::Timeout {
                    correlation_id: self.correlation_id.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Занятый correlation id. Освобождается при `drop`.
struct Claim {
    correlation_id: String,
    pending: Arc<DashSet<String>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
