/// Request/reply broker: topic cache, publisher, bus, reply router, façade.
pub mod broker;
/// Settings loading and broker configuration.
pub mod config;
/// Process-level errors and re-exports of the broker error taxonomy.
pub mod error;
/// Logging initialization (filters, console and file sinks).
pub mod logging;
/// Publish/subscribe transport boundary and the in-memory backend.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broker façade, factory and streams.
pub use broker::{
    Broker, BrokerFactory, BrokerIdentity, Envelope, EventStream, PubSubBroker, PublishOptions,
    StatsSnapshot,
};
/// Configuration.
pub use config::{BrokerConfig, BrokerKind, Settings};
/// Errors and result types.
pub use error::{BrokerError, EmigateResult, SettingsError, StackError, TransportError};
/// Logging.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Transport boundary.
pub use transport::{
    InMemoryTransport, InboundMessage, MessageHandler, MessageId, Transport, TransportSubscription,
};
