use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Счётчики брокера.
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Успешные публикации
    published: AtomicU64,
    /// Публикации, отклонённые транспортом
    publish_failures: AtomicU64,
    /// Декодированные входящие сообщения
    received: AtomicU64,
    /// Входящие сообщения, которые не удалось декодировать
    malformed: AtomicU64,
    /// Подтверждённые входящие сообщения
    acked: AtomicU64,
    /// Ожидания, получившие ответ
    replies_matched: AtomicU64,
    /// Ожидания, завершившиеся таймаутом
    reply_timeouts: AtomicU64,
}

/// Снимок счётчиков на момент вызова [`BrokerStats::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub malformed: u64,
    pub acked: u64,
    pub replies_matched: u64,
    pub reply_timeouts: u64,
}

impl BrokerStats {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_matched(&self) {
        self.replies_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_timeout(&self) {
        self.reply_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            reply_timeouts: self.reply_timeouts.load(Ordering::Relaxed),
        }
    }
}
