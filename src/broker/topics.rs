use std::sync::Arc;

use dashmap::DashMap;
use emigate_error::BrokerError;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Кэш дескрипторов топиков.
///
/// Первый `resolve` имени проверяет топик на бэкенде и при необходимости
/// создаёт его; результат кэшируется на всё время жизни процесса.
/// Конкурентные первые обращения к одному имени ждут одну и ту же
/// инициализацию (`OnceCell` на имя), поэтому запрос на создание уходит не
/// больше одного раза. Ошибка не кэшируется: следующий вызов попробует снова.
pub struct TopicCache<T: Transport> {
    transport: Arc<T>,
    entries: DashMap<String, Arc<OnceCell<T::Topic>>>,
}

impl<T: Transport> TopicCache<T> {
    /// Создаёт пустой кэш поверх транспорта.
    ///
    /// # Аргументы
    /// * `transport` - транспорт, у которого кэш проверяет и создаёт топики.
    ///
    /// # Возвращает
    /// Кэш без разрешённых топиков. Бэкенд при создании не вызывается.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            entries: DashMap::new(),
        }
    }

    /// Разрешает имя топика, создавая топик на бэкенде при необходимости.
    ///
    /// # Возвращает
    /// - `Ok(topic)`: дескриптор из кэша или после проверки/создания;
    /// - `Err(BrokerError::TopicResolution)`: пустое имя или сбой бэкенда.
    ///   Ошибка не кэшируется.
    pub async fn resolve(
        &self,
        name: &str,
    ) -> Result<T::Topic, BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::TopicResolution {
                topic: String::new(),
                reason: "topic name is empty".to_string(),
            });
        }

        let cell = match self.entries.get(name) {
            Some(entry) => entry.value().clone(),
            None => self.entries.entry(name.to_string()).or_default().clone(),
        };

        if let Some(topic) = cell.get() {
            return Ok(topic.clone());
        }

        cell.get_or_try_init(|| self.verify_or_create(name))
            .await
            .cloned()
    }

    /// Количество успешно разрешённых топиков.
    pub fn cached_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_cached(
        &self,
        name: &str,
    ) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.value().initialized())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Собственные методы
    ////////////////////////////////////////////////////////////////////////////

    async fn verify_or_create(
        &self,
        name: &str,
    ) -> Result<T::Topic, BrokerError> {
        let topic = self.transport.topic(name);

        if self.exists(name, &topic).await? {
            debug!(topic = name, "Topic exists");
            return Ok(topic);
        }

        match self.transport.create_topic(&topic).await {
            Ok(()) => {
                info!(topic = name, "Topic created");
                Ok(topic)
            }
            Err(e) if e.is_already_exists() => {
                // Топик создал кто-то другой между проверкой и созданием.
                warn!(topic = name, "Topic creation raced, re-checking existence");
                if self.exists(name, &topic).await? {
                    Ok(topic)
                } else {
                    Err(BrokerError::TopicResolution {
                        topic: name.to_string(),
                        reason: "topic reported as existing but was not found".to_string(),
                    })
                }
            }
            Err(e) => Err(BrokerError::topic_resolution(name, &e)),
        }
    }

    async fn exists(
        &self,
        name: &str,
        topic: &T::Topic,
    ) -> Result<bool, BrokerError> {
        self.transport
            .topic_exists(topic)
            .await
            .map_err(|e| BrokerError::topic_resolution(name, &e))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;
    use crate::transport::InMemoryTransport;

    fn setup() -> (Arc<InMemoryTransport>, Arc<TopicCache<InMemoryTransport>>) {
        let transport = Arc::new(InMemoryTransport::new());
        let cache = Arc::new(TopicCache::new(transport.clone()));
        (transport, cache)
    }

    /// Тест проверяет, что K конкурентных первых разрешений одного имени
    /// порождают ровно один запрос на создание и один и тот же дескриптор.
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_resolution_is_single_flight() {
        let (transport, cache) = setup();
        transport.set_create_delay(Some(Duration::from_millis(50)));

        let mut set = JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            set.spawn(async move { cache.resolve("orders").await });
        }

        let mut handles = Vec::new();
        while let Some(res) = set.join_next().await {
            handles.push(res.unwrap().unwrap());
        }

        assert_eq!(transport.create_calls(), 1);
        assert_eq!(transport.exists_calls(), 1);
        assert!(handles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.cached_len(), 1);
    }

    /// Тест проверяет, что существующий топик не создаётся заново, а
    /// повторное разрешение идёт из кэша.
    #[tokio::test]
    async fn test_existing_topic_is_not_created() {
        let (transport, cache) = setup();
        transport.seed_topic("events");

        let topic = cache.resolve("events").await.unwrap();
        assert_eq!(topic.name(), "events");
        cache.resolve("events").await.unwrap();

        assert_eq!(transport.create_calls(), 0);
        assert_eq!(transport.exists_calls(), 1);
        assert!(cache.is_cached("events"));
    }

    /// Тест проверяет, что проигранная гонка создания считается успехом
    /// после повторной проверки существования.
    #[tokio::test]
    async fn test_already_exists_is_success_after_recheck() {
        let (transport, cache) = setup();
        transport.inject_create_conflict(true);

        cache.resolve("contested").await.unwrap();
        assert_eq!(transport.create_calls(), 1);
        assert_eq!(transport.exists_calls(), 2);
        assert!(cache.is_cached("contested"));
    }

    /// Тест проверяет, что ошибка не кэшируется и следующий вызов
    /// повторяет разрешение.
    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let (transport, cache) = setup();
        transport.fail_topic_checks(true);

        let err = cache.resolve("flaky").await.unwrap_err();
        assert!(matches!(err, BrokerError::TopicResolution { ref topic, .. } if topic == "flaky"));
        assert!(!cache.is_cached("flaky"));
        assert_eq!(cache.cached_len(), 0);

        transport.fail_topic_checks(false);
        cache.resolve("flaky").await.unwrap();
        assert!(cache.is_cached("flaky"));
        assert_eq!(transport.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_creation_failure_surfaces() {
        let (transport, cache) = setup();
        transport.fail_topic_creation(true);

        let err = cache.resolve("forbidden").await.unwrap_err();
        assert!(err.to_string().contains("forbidden"));
        assert!(!transport.has_topic("forbidden"));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (transport, cache) = setup();
        let err = cache.resolve("").await.unwrap_err();
        assert!(matches!(err, BrokerError::TopicResolution { .. }));
        assert_eq!(transport.exists_calls(), 0);
    }
}
