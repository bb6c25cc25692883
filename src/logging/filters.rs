use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Фильтр событий: `RUST_LOG`, если задан, иначе директива из конфига.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directive = config.build_filter_directive();
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter directive '{directive}': {e}; falling back to 'info'");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    // Мини-буферный writer для тестов
    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriterGuard(self.0.clone())
        }
    }

    struct VecWriterGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriterGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что директива конфига отсекает уровни ниже заданного.
    #[test]
    #[serial]
    fn test_config_level_filters_events() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "warn".to_string(),
            ..Default::default()
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_ansi(false)
            .with_filter(build_filter_from_config(&cfg));
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));

        tracing::info!(target: "emigate::broker", "info is filtered out");
        tracing::warn!(target: "emigate::broker", "warn passes through");

        let out = String::from_utf8_lossy(&buffer.lock().unwrap()).to_string();
        assert!(out.contains("warn passes through"));
        assert!(!out.contains("info is filtered out"));
    }

    /// Тест проверяет, что RUST_LOG имеет приоритет над конфигом.
    #[test]
    #[serial]
    fn test_rust_log_wins() {
        env::set_var("RUST_LOG", "debug");
        let cfg = LoggingConfig {
            level: "error".to_string(),
            ..Default::default()
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_ansi(false)
            .with_filter(build_filter_from_config(&cfg));
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));
        env::remove_var("RUST_LOG");

        tracing::debug!(target: "emigate::broker", "debug from env");
        let out = String::from_utf8_lossy(&buffer.lock().unwrap()).to_string();
        assert!(out.contains("debug from env"));
    }
}
