//! Resolution of the telemetry namespace inside the host's extra config.
//!
//! The host hands over an untyped [`ExtraConfig`] tree. This module decodes the
//! sub-tree stored under [`NAMESPACE`] into a [`TelemetryConfig`], collecting
//! every field problem it finds instead of stopping at the first one.
//!
//! # Shape
//!
//! ```json
//! {
//!   "logging": {
//!     "level": "INFO",
//!     "module": "gateway",
//!     "skip_paths": ["/health"],
//!     "json": { "disable_html_escape": false, "pretty_print": false, "data_key": "" }
//!   },
//!   "tracing": {
//!     "exporter_url": "http://otel-collector:4317",
//!     "attributes": { "service": "gateway", "environment": "production", "id": "1" }
//!   }
//! }
//! ```

use std::fmt;

use common::ExtraConfig;
use serde_json::{Map, Value};
use thiserror::Error;

/// Key under which the telemetry settings live in the host's extra config.
pub const NAMESPACE: &str = "github_com/gateway-telemetry/telemetry";

/// Errors produced while resolving the telemetry namespace.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The namespace (or one of its sections) is absent or not a mapping.
    #[error("unable to load custom config")]
    NoConfig,

    /// A present section has missing or mistyped fields.
    #[error("malformed telemetry config: {}", join_field_errors(.0))]
    Malformed(Vec<FieldError>),
}

/// A single problem found while decoding a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `logging.level`.
    pub path: String,
    pub problem: FieldProblem,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.problem)
    }
}

/// What is wrong with a field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldProblem {
    #[error("required field is missing")]
    Missing,

    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("must not be empty")]
    Empty,
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

/// Validated telemetry settings. An absent section is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub logging: Option<LoggingConfig>,
    pub tracing: Option<TracingConfig>,
}

/// Settings for the application logger and the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Request paths excluded from access logging, in configuration order.
    pub skip_paths: Vec<String>,
    /// Severity threshold name (`DEBUG`, `INFO`, `WARNING`, `ERROR`, `CRITICAL`).
    pub level: String,
    /// Label attached to every log line.
    pub module: String,
    /// ECS formatter options; `None` when the `json` mapping is absent.
    pub ecs_formatter: Option<EcsFormatterConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            skip_paths: Vec::new(),
            level: "INFO".into(),
            module: "DEFAULT".into(),
            ecs_formatter: None,
        }
    }
}

/// Options for the Elastic Common Schema line encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcsFormatterConfig {
    /// Write `<`, `>` and `&` verbatim instead of as `\u00XX` escapes.
    pub disable_html_escape: bool,
    /// Indent each rendered object.
    pub pretty_print: bool,
    /// When non-empty, event fields are nested under this key.
    pub data_key: String,
}

/// Settings for the span export pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Collector endpoint spans are exported to.
    pub export_url: String,
    pub attributes: ResourceAttributes,
}

/// Static metadata attached to every exported span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub service: String,
    pub environment: String,
    pub id: String,
}

impl Default for ResourceAttributes {
    fn default() -> Self {
        Self {
            service: "gateway".into(),
            environment: "development".into(),
            id: "1".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the telemetry settings stored under [`NAMESPACE`].
///
/// # Errors
///
/// Returns [`ConfigError::NoConfig`] if the namespace is absent or not a
/// mapping, or if a present section is not a mapping. Returns
/// [`ConfigError::Malformed`] listing every missing or mistyped field.
pub fn resolve(extra: &ExtraConfig) -> Result<TelemetryConfig, ConfigError> {
    resolve_namespace(extra, NAMESPACE)
}

/// Resolve telemetry settings stored under an arbitrary namespace key.
///
/// # Errors
///
/// See [`resolve`].
pub fn resolve_namespace(extra: &ExtraConfig, key: &str) -> Result<TelemetryConfig, ConfigError> {
    let root = extra
        .get(key)
        .and_then(Value::as_object)
        .ok_or(ConfigError::NoConfig)?;

    let mut errors = Vec::new();

    let logging = section(root, "logging")?.map(|map| decode_logging(map, &mut errors));
    let tracing = section(root, "tracing")?.map(|map| decode_tracing(map, &mut errors));

    if !errors.is_empty() {
        return Err(ConfigError::Malformed(errors));
    }

    Ok(TelemetryConfig { logging, tracing })
}

/// Look up a top-level section. `null` counts as absent.
fn section<'a>(
    root: &'a Map<String, Value>,
    name: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ConfigError::NoConfig),
    }
}

fn decode_logging(map: &Map<String, Value>, errors: &mut Vec<FieldError>) -> LoggingConfig {
    let mut fields = Fields::new("logging", map, errors);
    let mut cfg = LoggingConfig::default();

    if let Some(items) = fields.optional_seq("skip_paths") {
        cfg.skip_paths = items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
    }
    if let Some(level) = fields.required_str("level") {
        cfg.level = level;
    }
    if let Some(module) = fields.required_str("module") {
        cfg.module = module;
    }
    if let Some(json) = fields.optional_map("json") {
        let mut ecs = Fields::new("logging.json", json, fields.errors);
        cfg.ecs_formatter = Some(EcsFormatterConfig {
            disable_html_escape: ecs.optional_bool("disable_html_escape").unwrap_or_default(),
            pretty_print: ecs.optional_bool("pretty_print").unwrap_or_default(),
            data_key: ecs.optional_str("data_key").unwrap_or_default(),
        });
    }

    cfg
}

fn decode_tracing(map: &Map<String, Value>, errors: &mut Vec<FieldError>) -> TracingConfig {
    let mut fields = Fields::new("tracing", map, errors);

    let export_url = fields.required_non_empty_str("exporter_url").unwrap_or_default();

    let mut attributes = ResourceAttributes::default();
    if let Some(attrs) = fields.optional_map("attributes") {
        let mut attrs = Fields::new("tracing.attributes", attrs, fields.errors);
        if let Some(service) = attrs.optional_str("service") {
            attributes.service = service;
        }
        if let Some(environment) = attrs.optional_str("environment") {
            attributes.environment = environment;
        }
        if let Some(id) = attrs.optional_str("id") {
            attributes.id = id;
        }
    }

    TracingConfig {
        export_url,
        attributes,
    }
}

/// Typed accessors over one mapping that record problems instead of failing.
struct Fields<'a, 'e> {
    section: &'static str,
    map: &'a Map<String, Value>,
    errors: &'e mut Vec<FieldError>,
}

impl<'a, 'e> Fields<'a, 'e> {
    fn new(
        section: &'static str,
        map: &'a Map<String, Value>,
        errors: &'e mut Vec<FieldError>,
    ) -> Self {
        Self {
            section,
            map,
            errors,
        }
    }

    /// Fetch a value, treating `null` as absent.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn push(&mut self, key: &str, problem: FieldProblem) {
        self.errors.push(FieldError {
            path: format!("{}.{key}", self.section),
            problem,
        });
    }

    fn wrong_type(&mut self, key: &str, expected: &'static str, found: &Value) {
        self.push(
            key,
            FieldProblem::WrongType {
                expected,
                found: kind(found),
            },
        );
    }

    fn required_str(&mut self, key: &str) -> Option<String> {
        match self.get(key) {
            None => {
                self.push(key, FieldProblem::Missing);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.wrong_type(key, "string", other);
                None
            }
        }
    }

    fn required_non_empty_str(&mut self, key: &str) -> Option<String> {
        let value = self.required_str(key)?;
        if value.trim().is_empty() {
            self.push(key, FieldProblem::Empty);
            return None;
        }
        Some(value)
    }

    fn optional_str(&mut self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            other => {
                self.wrong_type(key, "string", other);
                None
            }
        }
    }

    fn optional_bool(&mut self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            other => {
                self.wrong_type(key, "bool", other);
                None
            }
        }
    }

    fn optional_seq(&mut self, key: &str) -> Option<&'a Vec<Value>> {
        match self.get(key)? {
            Value::Array(items) => Some(items),
            other => {
                self.wrong_type(key, "sequence", other);
                None
            }
        }
    }

    fn optional_map(&mut self, key: &str) -> Option<&'a Map<String, Value>> {
        match self.get(key)? {
            Value::Object(map) => Some(map),
            other => {
                self.wrong_type(key, "mapping", other);
                None
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extra(namespace: Value) -> ExtraConfig {
        let mut extra = ExtraConfig::new();
        extra.insert(NAMESPACE.into(), namespace);
        extra
    }

    fn malformed_paths(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Malformed(errors) => errors.into_iter().map(|e| e.path).collect(),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn missing_namespace_is_no_config() {
        let err = resolve(&ExtraConfig::new()).unwrap_err();
        assert!(matches!(err, ConfigError::NoConfig));
    }

    #[test]
    fn non_mapping_namespace_is_no_config() {
        let err = resolve(&extra(json!(["logging"]))).unwrap_err();
        assert!(matches!(err, ConfigError::NoConfig));
    }

    #[test]
    fn empty_namespace_leaves_both_sections_unset() {
        let cfg = resolve(&extra(json!({}))).unwrap();
        assert_eq!(cfg, TelemetryConfig::default());
    }

    #[test]
    fn logging_only_namespace() {
        let cfg = resolve(&extra(json!({
            "logging": { "level": "WARNING", "module": "svc" }
        })))
        .unwrap();
        let logging = cfg.logging.unwrap();
        assert_eq!(logging.level, "WARNING");
        assert_eq!(logging.module, "svc");
        assert!(logging.skip_paths.is_empty());
        assert!(cfg.tracing.is_none());
    }

    #[test]
    fn end_to_end_example_resolves() {
        let cfg = resolve(&extra(json!({
            "logging": { "level": "DEBUG", "module": "svc", "skip_paths": ["/health"] }
        })))
        .unwrap();
        let logging = cfg.logging.unwrap();
        assert_eq!(logging.level, "DEBUG");
        assert_eq!(logging.module, "svc");
        assert_eq!(logging.skip_paths, vec!["/health".to_string()]);
    }

    #[test]
    fn skip_paths_keep_only_strings_in_order() {
        let cfg = resolve(&extra(json!({
            "logging": {
                "level": "INFO",
                "module": "svc",
                "skip_paths": ["/a", 1, "/b", null, {"x": 1}, "/c", true]
            }
        })))
        .unwrap();
        assert_eq!(cfg.logging.unwrap().skip_paths, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn skip_paths_must_be_a_sequence() {
        let err = resolve(&extra(json!({
            "logging": { "level": "INFO", "module": "svc", "skip_paths": "/health" }
        })))
        .unwrap_err();
        assert_eq!(malformed_paths(err), vec!["logging.skip_paths"]);
    }

    #[test]
    fn absent_json_leaves_formatter_unset() {
        let cfg = resolve(&extra(json!({
            "logging": { "level": "INFO", "module": "svc" }
        })))
        .unwrap();
        assert!(cfg.logging.unwrap().ecs_formatter.is_none());
    }

    #[test]
    fn json_with_only_pretty_print_defaults_the_rest() {
        let cfg = resolve(&extra(json!({
            "logging": { "level": "INFO", "module": "svc", "json": { "pretty_print": true } }
        })))
        .unwrap();
        let ecs = cfg.logging.unwrap().ecs_formatter.unwrap();
        assert!(ecs.pretty_print);
        assert!(!ecs.disable_html_escape);
        assert_eq!(ecs.data_key, "");
    }

    #[test]
    fn logging_section_must_be_a_mapping() {
        let err = resolve(&extra(json!({ "logging": "INFO" }))).unwrap_err();
        assert!(matches!(err, ConfigError::NoConfig));
    }

    #[test]
    fn present_logging_requires_level_and_module() {
        let err = resolve(&extra(json!({ "logging": { "skip_paths": [] } }))).unwrap_err();
        assert_eq!(malformed_paths(err), vec!["logging.level", "logging.module"]);
    }

    #[test]
    fn all_problems_are_reported_together() {
        let err = resolve(&extra(json!({
            "logging": {
                "level": 3,
                "module": "svc",
                "json": { "pretty_print": "yes", "data_key": 7 }
            },
            "tracing": {}
        })))
        .unwrap_err();
        assert_eq!(
            malformed_paths(err),
            vec![
                "logging.level",
                "logging.json.pretty_print",
                "logging.json.data_key",
                "tracing.exporter_url",
            ]
        );
    }

    #[test]
    fn wrong_type_reports_expected_and_found() {
        let err =
            resolve(&extra(json!({ "logging": { "level": 3, "module": "svc" } }))).unwrap_err();
        let ConfigError::Malformed(errors) = err else {
            panic!("expected Malformed");
        };
        assert_eq!(
            errors[0].problem,
            FieldProblem::WrongType {
                expected: "string",
                found: "number"
            }
        );
        assert!(errors[0].to_string().contains("logging.level"));
    }

    #[test]
    fn tracing_uses_default_attributes() {
        let cfg = resolve(&extra(json!({
            "tracing": { "exporter_url": "http://collector:4317" }
        })))
        .unwrap();
        let tracing = cfg.tracing.unwrap();
        assert_eq!(tracing.export_url, "http://collector:4317");
        assert_eq!(tracing.attributes, ResourceAttributes::default());
        assert!(cfg.logging.is_none());
    }

    #[test]
    fn tracing_attributes_can_be_overridden() {
        let cfg = resolve(&extra(json!({
            "tracing": {
                "exporter_url": "http://collector:4317",
                "attributes": { "service": "orders", "environment": "production" }
            }
        })))
        .unwrap();
        let attrs = cfg.tracing.unwrap().attributes;
        assert_eq!(attrs.service, "orders");
        assert_eq!(attrs.environment, "production");
        assert_eq!(attrs.id, "1");
    }

    #[test]
    fn tracing_rejects_empty_exporter_url() {
        let err = resolve(&extra(json!({ "tracing": { "exporter_url": "  " } }))).unwrap_err();
        let ConfigError::Malformed(errors) = err else {
            panic!("expected Malformed");
        };
        assert_eq!(errors[0].problem, FieldProblem::Empty);
    }

    #[test]
    fn null_sections_count_as_absent() {
        let cfg = resolve(&extra(json!({ "logging": null, "tracing": null }))).unwrap();
        assert_eq!(cfg, TelemetryConfig::default());
    }

    #[test]
    fn custom_namespace_key() {
        let mut extra = ExtraConfig::new();
        extra.insert("acme/telemetry".into(), json!({}));
        assert!(resolve_namespace(&extra, "acme/telemetry").is_ok());
        assert!(matches!(resolve(&extra), Err(ConfigError::NoConfig)));
    }
}
