//! Structured JSON logging: one line per event, with a stable field set of
//! `timestamp, level, message, logger, extra_fields`.
//!
//! The stock `tracing_subscriber` JSON layer doesn't produce this exact shape (it nests
//! fields under `fields` and names the target `target`, not `logger`), so this module
//! provides a small custom `FormatEvent` implementation instead.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

struct JsonLineFormatter;

struct FieldCollector {
    message: String,
    extra: Map<String, Value>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.extra.insert(field.name().to_string(), Value::String(rendered));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.extra
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.extra
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.extra.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        if let Some(num) = serde_json::Number::from_f64(value) {
            self.extra.insert(field.name().to_string(), Value::Number(num));
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut collector = FieldCollector {
            message: String::new(),
            extra: Map::new(),
        };
        event.record(&mut collector);

        let mut line = Map::new();
        line.insert(
            "timestamp".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        line.insert("level".into(), Value::String(metadata.level().to_string()));
        line.insert("message".into(), Value::String(collector.message));
        line.insert("logger".into(), Value::String(metadata.target().to_string()));
        line.insert("extra_fields".into(), Value::Object(collector.extra));

        writeln!(writer, "{}", Value::Object(line))
    }
}

/// Installs the process-wide subscriber. `log_level` sets the default filter; it can be
/// overridden at runtime via `RUST_LOG`, matching `tracing_subscriber`'s usual precedence.
pub fn init(log_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_tracing_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(JsonLineFormatter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_a_valid_filter_directive() {
        assert_eq!(LogLevel::Debug.as_tracing_filter(), "debug");
    }
}
