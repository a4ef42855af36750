//! # Format Dictionary
//!
//! Resolves `subsystem:event` pairs to numeric tracepoint ids and loads the
//! field layout used to decode their RAW payloads.
//!
//! The dictionary is built once per process and shared through an `Arc` by
//! every event source. Identities and layouts are cached for the lifetime of
//! the dictionary since tracepoint formats do not change while the kernel
//! runs.
//!
//! ## Sources
//!
//! - [`FormatDictionary::from_system()`] - the running kernel's tracefs
//! - [`FormatDictionary::with_root()`] - any directory laid out like
//!   `tracefs/events` (fixtures, copied sysroots)

pub mod layout;
pub mod parser;
pub mod tracefs;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

pub use layout::{EventIdentity, FieldKind, FieldSpec, RecordLayout};
pub use parser::{parse_format, FormatParseError, ParsedFormat};

use crate::domain::{EventId, TraceError};

#[derive(Debug, Default)]
struct Cache {
    identities: HashMap<(String, String), Arc<EventIdentity>>,
    layouts: HashMap<EventId, Arc<RecordLayout>>,
}

/// Process-wide tracepoint format dictionary
#[derive(Debug)]
pub struct FormatDictionary {
    events_dir: PathBuf,
    cache: Mutex<Cache>,
}

impl FormatDictionary {
    /// Dictionary backed by the running kernel's tracefs
    ///
    /// # Errors
    /// Returns an error if tracefs cannot be located
    pub fn from_system() -> Result<Self, TraceError> {
        let events_dir = tracefs::locate_events_dir()?;
        info!("Loaded tracefs event formats from {}", events_dir.display());
        Ok(Self::with_root(events_dir))
    }

    /// Dictionary backed by an explicit `events` directory
    #[must_use]
    pub fn with_root(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            events_dir: events_dir.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Directory holding `<subsystem>/<event>/format` files
    #[must_use]
    pub fn events_dir(&self) -> &Path {
        &self.events_dir
    }

    /// Resolve a tracepoint to its numeric id
    ///
    /// # Errors
    /// - `EventNotFound` if tracefs does not expose the tracepoint (feature
    ///   disabled, module not loaded, misspelled name)
    /// - `PermissionDenied` if tracefs is not readable by this user
    pub fn resolve(&self, subsystem: &str, event: &str) -> Result<Arc<EventIdentity>, TraceError> {
        let key = (subsystem.to_string(), event.to_string());
        if let Some(identity) = self.lock().identities.get(&key) {
            return Ok(Arc::clone(identity));
        }

        let qualified = format!("{subsystem}:{event}");
        let dir = self
            .event_dir(subsystem, event)
            .ok_or_else(|| TraceError::EventNotFound(qualified.clone()))?;

        let id = match read_id(&dir) {
            Ok(id) => id,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(TraceError::PermissionDenied {
                    event: qualified,
                    reason: format!("cannot read {} (run as root)", dir.display()),
                });
            }
            Err(e) => {
                debug!("Cannot resolve {qualified}: {e}");
                return Err(TraceError::EventNotFound(qualified));
            }
        };

        let identity = Arc::new(EventIdentity::new(subsystem, event, EventId(id)));
        debug!("Resolved {identity}");

        let mut cache = self.lock();
        Ok(Arc::clone(cache.identities.entry(key).or_insert(identity)))
    }

    /// Field layout of a resolved tracepoint
    ///
    /// # Errors
    /// Returns `FormatUnavailable` if the format file is missing, unreadable,
    /// malformed or describes a different id. Callers are expected to fall
    /// back to raw payload delivery.
    pub fn layout_for(&self, identity: &EventIdentity) -> Result<Arc<RecordLayout>, TraceError> {
        if let Some(layout) = self.layout_by_id(identity.id) {
            return Ok(layout);
        }

        let unavailable = |reason: String| TraceError::FormatUnavailable {
            event: identity.qualified_name(),
            reason,
        };

        let dir = self
            .event_dir(&identity.subsystem, &identity.event)
            .ok_or_else(|| unavailable("invalid event name".to_string()))?;
        let path = dir.join("format");
        let text = fs::read_to_string(&path)
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        let parsed = parse_format(&text)
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;

        if let Some(id) = parsed.id.filter(|&id| id != identity.id.0) {
            let reason = format!("format describes ID:{id}, expected {}", identity.id);
            return Err(unavailable(reason));
        }

        let layout = RecordLayout::new(identity.clone(), parsed.fields);
        Ok(self.register(layout))
    }

    /// Cached layout for the `common_type` found in a payload
    #[must_use]
    pub fn layout_by_id(&self, id: EventId) -> Option<Arc<RecordLayout>> {
        self.lock().layouts.get(&id).cloned()
    }

    /// Add a layout obtained elsewhere (e.g. a recorded trace's header)
    ///
    /// The first layout registered for an id wins.
    #[must_use]
    pub fn register(&self, layout: RecordLayout) -> Arc<RecordLayout> {
        let mut cache = self.lock();
        let identity = Arc::new(layout.identity.clone());
        cache
            .identities
            .entry((identity.subsystem.clone(), identity.event.clone()))
            .or_insert(identity);
        let layout = cache
            .layouts
            .entry(layout.identity.id)
            .or_insert_with(|| Arc::new(layout));
        Arc::clone(layout)
    }

    /// `<events>/<subsystem>/<event>`, rejecting names that would escape the
    /// events directory
    fn event_dir(&self, subsystem: &str, event: &str) -> Option<PathBuf> {
        let valid = |s: &str| !s.is_empty() && s != "." && s != ".." && !s.contains('/');
        if !valid(subsystem) || !valid(event) {
            return None;
        }
        Some(self.events_dir.join(subsystem).join(event))
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read the id from `id`, falling back to the `ID:` line of `format`
fn read_id(dir: &Path) -> std::io::Result<u32> {
    let invalid = |what: &str| std::io::Error::new(ErrorKind::InvalidData, what.to_string());

    match fs::read_to_string(dir.join("id")) {
        Ok(text) => text.trim().parse().map_err(|_| invalid("malformed id")),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let text = fs::read_to_string(dir.join("format"))?;
            text.lines()
                .find_map(|line| line.trim().strip_prefix("ID:"))
                .and_then(|value| value.trim().parse().ok())
                .ok_or_else(|| invalid("format has no ID line"))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_IDLE_FORMAT: &str = "name: cpu_idle
ID: 512
format:
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;

\tfield:u32 state;\toffset:8;\tsize:4;\tsigned:0;
\tfield:u32 cpu_id;\toffset:12;\tsize:4;\tsigned:0;

print fmt: \"state=%lu cpu_id=%lu\", (unsigned long)REC->state, (unsigned long)REC->cpu_id
";

    /// Create `<root>/<subsystem>/<event>` with optional `id` and `format`
    fn write_event(dir: &Path, id: Option<&str>, format: Option<&str>) {
        fs::create_dir_all(dir).unwrap();
        if let Some(id) = id {
            fs::write(dir.join("id"), id).unwrap();
        }
        if let Some(format) = format {
            fs::write(dir.join("format"), format).unwrap();
        }
    }

    #[test]
    fn test_resolve_and_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("power/cpu_idle");
        write_event(&dir, Some("512\n"), Some(CPU_IDLE_FORMAT));

        let dict = FormatDictionary::with_root(tmp.path());
        let identity = dict.resolve("power", "cpu_idle").unwrap();
        assert_eq!(identity.id, EventId(512));

        let layout = dict.layout_for(&identity).unwrap();
        assert_eq!(layout.fields.len(), 6);
        assert_eq!(layout.field("state").unwrap().offset, 8);

        // Second lookups come from the cache
        let again = dict.resolve("power", "cpu_idle").unwrap();
        let cached = dict.layout_by_id(EventId(512)).unwrap();
        assert!(Arc::ptr_eq(&identity, &again));
        assert!(Arc::ptr_eq(&layout, &cached));
    }

    #[test]
    fn test_resolve_falls_back_to_format_id() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("power/cpu_idle");
        write_event(&dir, None, Some(CPU_IDLE_FORMAT));

        let dict = FormatDictionary::with_root(tmp.path());
        assert_eq!(dict.resolve("power", "cpu_idle").unwrap().id, EventId(512));
    }

    #[test]
    fn test_unknown_event() {
        let tmp = tempfile::tempdir().unwrap();
        let dict = FormatDictionary::with_root(tmp.path());

        let err = dict.resolve("i915", "gpu_freq_change").unwrap_err();
        assert_eq!(err.to_string(), "Tracepoint i915:gpu_freq_change not found");
        assert!(matches!(err, TraceError::EventNotFound(_)));
    }

    #[test]
    fn test_path_escape_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let dict = FormatDictionary::with_root(tmp.path());

        for (subsystem, event) in [("..", "etc"), ("power", "a/b"), ("power", "")] {
            let err = dict.resolve(subsystem, event).unwrap_err();
            assert!(
                matches!(err, TraceError::EventNotFound(_)),
                "{subsystem}:{event}"
            );
        }
    }

    #[test]
    fn test_missing_format_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        write_event(&tmp.path().join("power/cpu_frequency"), Some("513"), None);

        let dict = FormatDictionary::with_root(tmp.path());
        let identity = dict.resolve("power", "cpu_frequency").unwrap();
        assert!(matches!(
            dict.layout_for(&identity),
            Err(TraceError::FormatUnavailable { .. })
        ));
    }

    #[test]
    fn test_mismatched_format_id_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("power/cpu_idle");
        write_event(&dir, Some("99"), Some(CPU_IDLE_FORMAT));

        let dict = FormatDictionary::with_root(tmp.path());
        let identity = dict.resolve("power", "cpu_idle").unwrap();
        let err = dict.layout_for(&identity).unwrap_err();
        assert!(err.to_string().contains("ID:512"));
    }

    #[test]
    fn test_register_keeps_first_layout() {
        let dict = FormatDictionary::with_root("/nonexistent");
        let identity = EventIdentity::new("power", "cpu_idle", EventId(512));
        let first = dict.register(RecordLayout::new(
            identity.clone(),
            vec![FieldSpec::new("state", 8, 4, FieldKind::Unsigned)],
        ));
        let second = dict.register(RecordLayout::new(identity, Vec::new()));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dict.resolve("power", "cpu_idle").unwrap().id, EventId(512));
    }
}
