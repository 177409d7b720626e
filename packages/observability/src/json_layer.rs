//! One JSON object per event for the shipper's diagnostic stream.
//!
//! Lines are flat, like the records the shipper itself carries:
//!
//! ```text
//! {"ts":"...","level":"warn","service":"log-shipper","pid":7,"target":"log_shipper::dispatch","msg":"Batch delivery failed","batch_id":"...","requeued":1}
//! ```
//!
//! Fields recorded on enclosing spans (for example the `batch_id` of an
//! in-flight send) are copied onto every event inside them. Event fields win
//! over span fields; neither can replace the fixed keys.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const MESSAGE_FIELD: &str = "message";

#[derive(Default)]
struct FieldVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == MESSAGE_FIELD {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
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

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, value);
    }
}

/// Fields captured when a span is created.
struct SpanFields(Map<String, Value>);

/// Layer writing flat JSON lines to `make_writer`.
pub struct JsonLayer<W> {
    service_name: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service_name: String, make_writer: W) -> Self {
        Self {
            service_name,
            pid: std::process::id(),
            make_writer,
        }
    }

    fn line(&self, event: &Event<'_>, inherited: Map<String, Value>) -> Map<String, Value> {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();

        let mut line = Map::new();
        line.insert(
            "ts".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        line.insert(
            "level".into(),
            Value::String(metadata.level().as_str().to_lowercase()),
        );
        line.insert("service".into(), Value::String(self.service_name.clone()));
        line.insert("pid".into(), Value::from(self.pid));
        line.insert("target".into(), Value::String(metadata.target().to_string()));
        line.insert(
            "msg".into(),
            Value::String(visitor.message.unwrap_or_default()),
        );

        for (key, value) in visitor.fields.into_iter().chain(inherited) {
            line.entry(key).or_insert(value);
        }
        line
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut visitor = FieldVisitor::default();
            attrs.record(&mut visitor);
            span.extensions_mut().insert(SpanFields(visitor.fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        // innermost span first, so its fields shadow outer ones
        let mut inherited = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &fields.0 {
                        inherited
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }
        }

        let line = self.line(event, inherited);
        if let Ok(json) = serde_json::to_string(&line) {
            let mut writer = self.make_writer.make_writer();
            let _ = writeln!(writer, "{json}");
        }
    }
}
