//! Forwarding `tracing` events into a recording.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::component::Archetype;
use crate::entity_path::EntityPath;
use crate::recording::RecordingStream;

/// Archetype name of forwarded log lines.
pub const TEXT_LOG: &str = "TextLog";

/// A `TextLog` archetype with `text` and `level` components.
pub fn text_log(text: impl Into<String>, level: &Level) -> Archetype {
    Archetype::builder(TEXT_LOG)
        .with("text", vec![text.into()])
        .with("level", vec![level.as_str().to_string()])
        .build()
}

/// A [`Layer`] that logs every event as a [`text_log`] at
/// `<prefix>/<target split on ::>`.
///
/// Events from `vislog` targets are skipped, otherwise a failing sink would
/// log about itself forever.
pub struct TextLogLayer {
    stream: RecordingStream,
    prefix: EntityPath,
}

impl TextLogLayer {
    pub fn new(stream: RecordingStream, prefix: EntityPath) -> Self {
        Self { stream, prefix }
    }

    fn entity_path(&self, target: &str) -> EntityPath {
        target
            .split("::")
            .filter(|part| !part.is_empty())
            .fold(self.prefix.clone(), |path, part| path.join(part))
    }
}

impl<S: Subscriber> Layer<S> for TextLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with("vislog") {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let path = self.entity_path(metadata.target());
        // Errors here have nowhere useful to go.
        let _ = self.stream.log(path, &text_log(visitor.finish(), metadata.level()));
    }
}

/// Collects the `message` field plus any other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}
