//! Event identities and field layouts
//!
//! A [`RecordLayout`] says where each named field lives inside the RAW
//! payload of one tracepoint. Layouts are immutable once loaded and shared
//! read-only between every decoder of that event.

use std::fmt;

use crate::domain::EventId;

/// A resolved tracepoint: `subsystem:event` plus its numeric id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    pub subsystem: String,
    pub event: String,
    pub id: EventId,
}

impl EventIdentity {
    #[must_use]
    pub fn new(subsystem: impl Into<String>, event: impl Into<String>, id: EventId) -> Self {
        Self {
            subsystem: subsystem.into(),
            event: event.into(),
            id,
        }
    }

    /// `subsystem:event`, the notation perf and tracefs tools use
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.subsystem, self.event)
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.subsystem, self.event, self.id)
    }
}

/// How the bytes of a field are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Two's complement integer of 1, 2, 4 or 8 bytes, sign-extended
    Signed,
    /// Unsigned integer of 1, 2, 4 or 8 bytes
    Unsigned,
    /// `char name[N]`, trimmed at the first NUL
    FixedString,
    /// `__data_loc` / `__rel_loc` string: a u32 at the field offset holds
    /// the string's offset (low 16 bits) and length (high 16 bits).
    /// `relative` offsets count from the end of the field instead of the
    /// start of the payload.
    DynamicString { relative: bool },
    /// `__data_loc` / `__rel_loc` array of anything but `char`, located the
    /// same way and returned as raw bytes
    DynamicBytes { relative: bool },
    /// Anything else (non-character arrays, odd widths): raw bytes
    Bytes,
}

/// One field of a tracepoint payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Byte offset from the start of the RAW payload
    pub offset: usize,
    /// Byte width as declared by tracefs
    pub size: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, offset: usize, size: usize, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
            kind,
        }
    }

    /// Fields every tracepoint carries (`common_type`, `common_pid`...)
    #[must_use]
    pub fn is_common(&self) -> bool {
        self.name.starts_with("common_")
    }

    /// First byte after the field
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Field layout of one tracepoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub identity: EventIdentity,
    pub fields: Vec<FieldSpec>,
}

impl RecordLayout {
    #[must_use]
    pub fn new(identity: EventIdentity, fields: Vec<FieldSpec>) -> Self {
        Self { identity, fields }
    }

    /// Get a field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields specific to this event, without the common header
    pub fn event_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.is_common())
    }

    /// Smallest payload length that holds every fixed-position field
    #[must_use]
    pub fn min_payload_len(&self) -> usize {
        self.fields.iter().map(FieldSpec::end).max().unwrap_or(0)
    }
}
