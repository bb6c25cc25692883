//! Брокер request/reply поверх publish/subscribe.
//!
//! Составные части, от листьев к фасаду:
//! - [`TopicCache`]: разрешение и кэширование топиков;
//! - [`Publisher`]: публикация с метаданными брокера;
//! - [`SubscriptionManager`]: подписки → шина;
//! - [`BroadcastChannel`]: внутрипроцессная шина входящих сообщений;
//! - [`ReplyRouter`]: сопоставление ответов с ожидающими запросами;
//! - [`PubSubBroker`]: фасад, реализующий [`Broker`].

mod bus;
mod envelope;
mod facade;
mod factory;
mod identity;
mod publisher;
mod reply;
mod stats;
mod stream;
mod subscriptions;
mod topics;

pub use bus::{BroadcastChannel, EnvelopeFilter, Listener};
pub use envelope::{
    Envelope, ATTR_CORRELATION_ID, ATTR_MESSAGE_ID, ATTR_REPLY_TO, ATTR_SENDER_ID, ATTR_TYPE,
};
pub use facade::{Broker, PubSubBroker};
pub use factory::BrokerFactory;
pub use identity::BrokerIdentity;
pub use publisher::{PublishOptions, Publisher};
pub use reply::{PendingWait, ReplyClaim, ReplyListener, ReplyRouter, RequestState};
pub use stats::{BrokerStats, StatsSnapshot};
pub use stream::EventStream;
pub use subscriptions::{BindReport, Binding, SubscriptionManager};
pub use topics::TopicCache;
