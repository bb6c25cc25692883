use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул `Arc<str>` для имён топиков: дескрипторы одного топика делят одну
/// строку.
static TOPIC_INTERN: Lazy<DashMap<String, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned `Arc<str>` для имени топика.
#[inline]
pub(crate) fn intern_topic<S: AsRef<str>>(name: S) -> Arc<str> {
    let key = name.as_ref();
    if let Some(existing) = TOPIC_INTERN.get(key) {
        return existing.clone();
    }
    TOPIC_INTERN
        .entry(key.to_string())
        .or_insert_with(|| Arc::from(key))
        .clone()
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что повторный вызов возвращает тот же Arc по указателю.
    #[test]
    fn test_intern_repeats() {
        let a1 = intern_topic("emi-gateway-replies");
        let a2 = intern_topic(String::from("emi-gateway-replies"));
        assert_eq!(&*a1, "emi-gateway-replies");
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[test]
    fn test_intern_different_keys() {
        let a1 = intern_topic("orders");
        let a2 = intern_topic("payments");
        assert!(!Arc::ptr_eq(&a1, &a2));
    }

    /// Тест проверяет, что конкурентные вызовы из разных потоков получают
    /// один и тот же Arc.
    #[test]
    fn test_intern_concurrent() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| intern_topic("shared-topic")))
            .collect();
        let arcs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for a in &arcs[1..] {
            assert!(Arc::ptr_eq(&arcs[0], a));
        }
    }
}
