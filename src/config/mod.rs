//! Настройки процесса и конфигурация брокера.

pub mod broker;
pub mod settings;

pub use broker::BrokerConfig;
pub use settings::{BrokerKind, Settings};
