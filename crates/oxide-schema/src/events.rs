//! Schema change notifications.
//!
//! Every staged change emits a [`SchemaEvent`]. Presentation layers drain them
//! with [`Database::take_events`](crate::Database::take_events) and render them
//! however they like; the engine only logs them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Category of a schema notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A table, field, or index will be created.
    Created,
    /// A field or index spec will change.
    Changed,
    /// A table was archived under an obsolete name.
    Obsolete,
    /// A table failed its consistency check and was repaired.
    Repaired,
    /// A staged change failed to apply.
    Error,
    /// Something was removed.
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Changed => "changed",
            Self::Obsolete => "obsolete",
            Self::Repaired => "repaired",
            Self::Error => "error",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A notification for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEvent {
    /// Human-readable message.
    pub message: String,
    /// Category.
    pub kind: ChangeKind,
}

impl SchemaEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(kind: ChangeKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for SchemaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Collects events unless suppressed; always logs them.
#[derive(Debug, Default)]
pub struct Notifier {
    quiet: bool,
    events: Vec<SchemaEvent>,
}

impl Notifier {
    /// Creates a notifier. A quiet notifier logs at debug level and keeps nothing.
    #[must_use]
    pub const fn new(quiet: bool) -> Self {
        Self {
            quiet,
            events: Vec::new(),
        }
    }

    /// Emits an event.
    pub fn emit(&mut self, kind: ChangeKind, message: impl Into<String>) {
        let event = SchemaEvent::new(kind, message);
        if self.quiet {
            debug!(kind = %event.kind, "{}", event.message);
            return;
        }
        info!(kind = %event.kind, "{}", event.message);
        self.events.push(event);
    }

    /// Events emitted since the last [`Notifier::take`].
    #[must_use]
    pub fn events(&self) -> &[SchemaEvent] {
        &self.events
    }

    /// Drains the collected events.
    pub fn take(&mut self) -> Vec<SchemaEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_notifier_keeps_nothing() {
        let mut notifier = Notifier::new(true);
        notifier.emit(ChangeKind::Created, "Table Page: created");
        assert!(notifier.events().is_empty());

        let mut notifier = Notifier::new(false);
        notifier.emit(ChangeKind::Created, "Table Page: created");
        let events = notifier.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert!(notifier.events().is_empty());
    }

    #[test]
    fn serializes_kind_in_lowercase() {
        let event = SchemaEvent::new(ChangeKind::Obsolete, "Table Log: renamed to _obsolete_Log");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"message":"Table Log: renamed to _obsolete_Log","kind":"obsolete"}"#
        );
        assert_eq!(event.to_string(), "[obsolete] Table Log: renamed to _obsolete_Log");
    }
}
