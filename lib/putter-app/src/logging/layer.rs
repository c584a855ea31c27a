use std::fmt::{self, Write as _};

use chrono::{SecondsFormat, Utc};
use tracing::{field::Field, Event, Subscriber};
use tracing_subscriber::{
    field::Visit,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

const APP_NAME: &str = "PUTTER";

pub fn build_formatting_layer<S, W>(config: &LoggingConfiguration, writer: W) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = Layer::new().with_writer(writer);
    if config.log_format_json {
        layer
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        layer.event_format(PipeDelimited).boxed()
    }
}

/// Formats events as `time | PUTTER | LEVEL | (file:line) | key:"value",... | message`.
struct PipeDelimited;

impl<S, N> FormatEvent<S, N> for PipeDelimited
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "{} | {} | {} | ({}:{})",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            APP_NAME,
            metadata.level(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0),
        )?;

        if !fields.pairs.is_empty() {
            write!(writer, " | {}", fields.pairs.join(","))?;
        }
        if let Some(message) = fields.message {
            write!(writer, " | {}", message)?;
        }

        writeln!(writer)
    }
}

/// Structured fields of one event, rendered as `key:value`, with the message held apart.
#[derive(Default)]
struct EventFields {
    pairs: Vec<String>,
    message: Option<String>,
}

impl EventFields {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        let mut pair = String::new();
        let _ = write!(pair, "{}:{}", field.name(), value);
        self.pairs.push(pair);
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.push(field, format_args!("\"{:?}\"", value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, format_args!("\"{}\"", value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, format_args!("{}", value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, format_args!("{}", value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, format_args!("{}", value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, format_args!("{}", value));
    }
}
