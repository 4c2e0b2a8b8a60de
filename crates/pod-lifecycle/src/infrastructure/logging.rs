//! provides logging helpers

use std::fmt::{self};
use std::path::Path;

use chrono::SecondsFormat;
use chrono::Utc;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Metadata;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Registry;

use crate::domain::lifecycle::SUMMARY_TARGET;

/// Writes each summary event as `<rfc3339 timestamp> <message>`.
struct SummaryFormatter;

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }
}

impl<S, N> FormatEvent<S, N> for SummaryFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "{} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            visitor.message.unwrap_or_default()
        )
    }
}

fn is_summary(metadata: &Metadata<'_>) -> bool {
    metadata.target() == SUMMARY_TARGET
}

/// initiate the global tracing subscriber
///
/// Summaries always reach stderr regardless of `RUST_LOG`. With
/// `summary_file`, they are also appended to a daily rolling file; the
/// returned guard flushes it on drop.
pub fn init<P: AsRef<Path>>(
    summary_file: Option<P>,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let fmt_layer = utils::logging::get_fmt_layer::<Registry>()
        .with_filter(utils::logging::default_env_filter().or(filter::filter_fn(is_summary)));

    let Some(summary_file) = summary_file else {
        registry().with(fmt_layer).init();
        return Ok(None);
    };

    let summary_file = summary_file.as_ref();
    let path = match summary_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = summary_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid summary file path: {}", summary_file.display()),
            )
        })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(path)
        .map_err(std::io::Error::other)?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let summary_layer = layer()
        .event_format(SummaryFormatter)
        .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(is_summary));

    registry().with(fmt_layer).with(summary_layer).init();
    Ok(Some(file_guard))
}
