//! Tracing setup: stderr plus an optional daily rolling file.

use mimic_core::config::{shellexpand, MimicConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `log_level`. The returned guard flushes the file
/// writer on drop and must be held for the life of the process.
pub fn init(config: &MimicConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.log_format.eq_ignore_ascii_case("json");

    let mut layers: Vec<BoxedLayer> = vec![if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    }];

    let guard = config.log_dir.as_deref().map(|dir| {
        let appender = tracing_appender::rolling::daily(shellexpand(dir), "mimic.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(if json {
            fmt::layer().json().with_ansi(false).with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
        guard
    });

    tracing_subscriber::registry().with(layers).with(filter).init();
    guard
}
