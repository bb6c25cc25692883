use std::sync::Arc;

use emigate_error::{EmigateResult, ResultExt};
use tracing::{info, warn};

use super::{Broker, PubSubBroker};
use crate::{
    config::{BrokerConfig, BrokerKind, Settings},
    transport::{InMemoryTransport, Transport},
};

/// Собирает брокер нужного варианта по настройкам.
///
/// Брокер возвращается как `Arc<dyn Broker>` и передаётся потребителям
/// явно; глобального экземпляра нет.
pub struct BrokerFactory;

impl BrokerFactory {
    /// Проверяет настройки и собирает брокер по `broker_type`.
    pub async fn build(settings: &Settings) -> EmigateResult<Arc<dyn Broker>> {
        settings
            .validate()
            .context("invalid broker settings")?;

        match settings.broker_type {
            BrokerKind::Memory => {
                let transport = Arc::new(InMemoryTransport::new());
                Self::connect(settings, transport).await
            }
        }
    }

    /// Собирает брокер поверх переданного транспорта.
    pub async fn with_transport<T: Transport>(
        settings: &Settings,
        transport: Arc<T>,
    ) -> EmigateResult<Arc<dyn Broker>> {
        settings
            .validate()
            .context("invalid broker settings")?;
        Self::connect(settings, transport).await
    }

    async fn connect<T: Transport>(
        settings: &Settings,
        transport: Arc<T>,
    ) -> EmigateResult<Arc<dyn Broker>> {
        let broker = PubSubBroker::connect(BrokerConfig::from(settings), transport).await;

        for (binding, err) in &broker.bind_report().failed {
            warn!(binding = %binding, error = %err, "Broker started without subscription");
        }
        info!(
            broker_type = ?settings.broker_type,
            sender_id = %broker.identity(),
            "Broker ready"
        );
        Ok(Arc::new(broker))
    }
}
