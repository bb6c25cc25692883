use std::io;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, registry::LookupSpan, Layer};

use super::config::{LogFormat, LoggingConfig};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Консольный слой в формате из конфига.
pub fn console_layer<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(config.with_ansi)
        .with_target(config.with_target);

    match config.format {
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Возвращает `None`, если `log_dir` не задан. Guard нужно держать до
/// конца работы, иначе хвост логов потеряется.
pub fn file_layer<S>(config: &LoggingConfig) -> Option<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = config.log_dir.as_ref()?;
    let appender = rolling::daily(dir, &config.file_prefix);
    let (writer, guard) = non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(config.with_target)
        .json()
        .boxed();
    Some((layer, guard))
}
