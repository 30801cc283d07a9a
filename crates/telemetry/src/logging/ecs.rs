//! Elastic Common Schema line encoder for `tracing-subscriber`.
//!
//! Every event becomes one JSON object:
//!
//! ```json
//! {"@timestamp":"2024-05-01T10:00:00.000Z","ecs.version":"1.6.0","log.level":"info","message":"GET /","module":"svc"}
//! ```
//!
//! Event fields land at the top level, or under [`EcsFormatterConfig::data_key`]
//! when one is configured.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

use crate::config::EcsFormatterConfig;

/// ECS version advertised on every line.
pub const ECS_VERSION: &str = "1.6.0";

/// Events emitted with this target are rendered with `log.level = "fatal"`.
pub const FATAL_TARGET: &str = "telemetry::fatal";

/// [`FormatEvent`] implementation producing ECS JSON lines.
#[derive(Debug, Clone, Default)]
pub struct EcsFormatter {
    options: EcsFormatterConfig,
}

impl EcsFormatter {
    pub fn new(options: EcsFormatterConfig) -> Self {
        Self { options }
    }

    /// Render one log object. Does not append a trailing newline.
    pub fn render(
        &self,
        timestamp: DateTime<Utc>,
        level: &str,
        message: &str,
        fields: Map<String, Value>,
    ) -> Result<String, serde_json::Error> {
        let mut object = Map::new();
        object.insert(
            "@timestamp".into(),
            Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert("log.level".into(), Value::String(level.into()));
        object.insert("message".into(), Value::String(message.into()));
        object.insert("ecs.version".into(), Value::String(ECS_VERSION.into()));

        if self.options.data_key.is_empty() {
            for (key, value) in fields {
                object.entry(key).or_insert(value);
            }
        } else if !fields.is_empty() {
            object.insert(self.options.data_key.clone(), Value::Object(fields));
        }

        let object = Value::Object(object);
        let rendered = if self.options.pretty_print {
            serde_json::to_string_pretty(&object)?
        } else {
            serde_json::to_string(&object)?
        };

        if self.options.disable_html_escape {
            Ok(rendered)
        } else {
            Ok(escape_html(&rendered))
        }
    }
}

impl<S, N> FormatEvent<S, N> for EcsFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let level = if metadata.target() == FATAL_TARGET {
            "fatal"
        } else {
            level_name(*metadata.level())
        };

        let line = self
            .render(Utc::now(), level, &visitor.message, visitor.fields)
            .map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// ECS `log.level` name for a `tracing` level.
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warning",
        Level::ERROR => "error",
    }
}

/// Replace `<`, `>` and `&` with their `\u00XX` escapes.
///
/// Only valid on serialised JSON, where these characters can appear inside
/// string literals only.
fn escape_html(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            other => out.push(other),
        }
    }
    out
}

/// Collects an event's fields as JSON values.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_owned()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}
