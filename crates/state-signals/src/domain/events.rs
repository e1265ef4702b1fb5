//! Event names: the two reserved protocol events and the validated set of
//! application-declared legal events.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::ValidationError;

/// Reserved event announcing a new exporter session.
pub const INITIALIZATION: &str = "initialization";

/// Reserved event announcing the end of an exporter session.
pub const SHUTDOWN: &str = "shutdown";

/// Both reserved protocol events.
pub const RESERVED_EVENTS: [&str; 2] = [INITIALIZATION, SHUTDOWN];

/// Whether `event` is one of the reserved protocol events.
pub fn is_reserved(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// Check that an event name is non-empty and carries no surrounding whitespace.
pub fn check_event_name(event: &str) -> Result<(), ValidationError> {
    if event.is_empty() || event.trim() != event {
        return Err(ValidationError::MalformedEvent(event.to_string()));
    }
    Ok(())
}

/// The set of events an exporter may publish, resolved once at initialization.
///
/// Never empty and never contains a reserved event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LegalEvents(BTreeSet<String>);

impl LegalEvents {
    /// Validate and collect the legal events. Duplicates collapse.
    pub fn new<I, S>(events: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for event in events {
            let event = event.into();
            check_event_name(&event)?;
            if is_reserved(&event) {
                return Err(ValidationError::ReservedEvent(event));
            }
            set.insert(event);
        }
        if set.is_empty() {
            return Err(ValidationError::EmptyLegalEvents);
        }
        Ok(Self(set))
    }

    /// Membership test.
    pub fn contains(&self, event: &str) -> bool {
        self.0.contains(event)
    }

    /// Reject reserved and undeclared events.
    pub fn check(&self, event: &str) -> Result<(), ValidationError> {
        if is_reserved(event) {
            return Err(ValidationError::ReservedEvent(event.to_string()));
        }
        if !self.contains(event) {
            return Err(ValidationError::IllegalEvent {
                event: event.to_string(),
                legal: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LegalEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, event) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{}'", event)?;
        }
        write!(f, "]")
    }
}
