use std::time::Duration;

use super::Settings;

/// Конфигурация экземпляра брокера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub replies_topic: String,
    pub replies_subscription: String,
    pub events_topic: String,
    pub events_subscription: String,
    pub materialized_view_updates_topic: String,
    pub materialized_view_updates_subscription: String,
    /// Таймаут ожидания ответа, если вызывающий не задал свой
    pub reply_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for BrokerConfig {
    fn from(s: &Settings) -> Self {
        Self {
            replies_topic: s.gateway_replies_topic.clone(),
            replies_subscription: s.gateway_replies_topic_subscription.clone(),
            events_topic: s.gateway_events_topic.clone(),
            events_subscription: s.gateway_events_topic_subscription.clone(),
            materialized_view_updates_topic: s.gateway_materialized_view_updates_topic.clone(),
            materialized_view_updates_subscription: s
                .gateway_materialized_view_updates_topic_subscription
                .clone(),
            reply_timeout: s.reply_timeout(),
            channel_capacity: s.channel_capacity,
        }
    }
}

impl BrokerConfig {
    pub fn with_reply_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.reply_timeout = timeout;
        self
    }
}
