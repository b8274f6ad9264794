//! `tracing` layer writing JSONL, and the subscriber builder.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::InstanceLogWriter;
use crate::error::{ChatError, ChatResult};

/// Filter used when neither `RUST_LOG` nor an explicit filter is set.
pub const DEFAULT_FILTER: &str = "talktime_core=info";

/// Layer that turns every event into a [`JsonLogEntry`] line.
pub struct JsonlLayer {
    writer: Arc<InstanceLogWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(InstanceLogWriter::new(logs_dir, instance)?),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn instance(&self) -> &str {
        self.writer.instance()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        // Logging must never take the process down
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut rendered = String::new();
        let _ = write!(rendered, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, serde_json::Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Composes the JSONL layer, an `EnvFilter` and an optional console layer
/// into the global subscriber.
///
/// ```ignore
/// let log_file = LoggingBuilder::new("./logs", "alice")
///     .with_filter("talktime_core=debug")
///     .init()?;
/// ```
pub struct LoggingBuilder {
    logs_dir: PathBuf,
    instance: String,
    console_output: bool,
    env_filter: Option<String>,
}

impl LoggingBuilder {
    pub fn new(logs_dir: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            instance: instance.into(),
            console_output: true,
            env_filter: None,
        }
    }

    /// Only write JSONL.
    pub fn no_console(mut self) -> Self {
        self.console_output = false;
        self
    }

    /// Replace [`DEFAULT_FILTER`]. `RUST_LOG` still takes precedence.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The JSONL layer alone, for callers composing their own subscriber.
    pub fn build_layer(&self) -> std::io::Result<JsonlLayer> {
        JsonlLayer::new(&self.logs_dir, &self.instance)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.env_filter.as_deref().unwrap_or(DEFAULT_FILTER)))
    }

    /// Install the global subscriber. Returns the JSONL file path.
    ///
    /// # Errors
    ///
    /// Fails if the log file cannot be created or a global subscriber is
    /// already set.
    pub fn init(self) -> ChatResult<PathBuf> {
        let jsonl = self.build_layer()?;
        let path = jsonl.log_path().to_path_buf();
        let console = self.console_output.then(|| tracing_subscriber::fmt::layer().with_target(true));

        tracing_subscriber::registry()
            .with(self.filter())
            .with(jsonl)
            .with(console)
            .try_init()
            .map_err(|e| ChatError::Io(std::io::Error::other(e)))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layer_writes_structured_fields() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "alice").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("replicate");
            let _enter = span.enter();
            tracing::info!(entries = 3u64, address = "/talktime/abc", "Merged remote entries");
            tracing::warn!(ok = false, "Dropped entry");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<JsonLogEntry> = content
            .lines()
            .map(|l| JsonLogEntry::from_json_line(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].msg, "Merged remote entries");
        assert_eq!(lines[0].level, "info");
        assert_eq!(lines[0].span.as_deref(), Some("replicate"));
        assert_eq!(lines[0].fields.as_ref().unwrap()["entries"], 3);
        assert_eq!(lines[1].level, "warn");
        assert_eq!(lines[1].fields.as_ref().unwrap()["ok"], false);
    }

    #[test]
    fn test_builder_layer_path() {
        let temp = TempDir::new().unwrap();
        let builder = LoggingBuilder::new(temp.path(), "bob").no_console();
        let layer = builder.build_layer().unwrap();
        assert_eq!(layer.instance(), "bob");
        assert!(layer.log_path().starts_with(temp.path()));
    }
}
