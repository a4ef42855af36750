use perftrace::domain::{EventId, TraceError};
use perftrace::format::{FieldKind, FormatDictionary};

fn fixtures() -> FormatDictionary {
    FormatDictionary::with_root(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/events"
    ))
}

#[test]
fn test_resolve_sched_switch() {
    let dict = fixtures();

    let identity = dict
        .resolve("sched", "sched_switch")
        .expect("sched_switch should resolve");
    assert_eq!(identity.id, EventId(316));
    assert_eq!(identity.qualified_name(), "sched:sched_switch");

    let layout = dict
        .layout_for(&identity)
        .expect("sched_switch format should parse");
    assert_eq!(layout.fields.len(), 11);
    assert_eq!(layout.event_fields().count(), 7);

    let prev_comm = layout.field("prev_comm").unwrap();
    assert_eq!((prev_comm.offset, prev_comm.size), (8, 16));
    assert_eq!(prev_comm.kind, FieldKind::FixedString);

    assert_eq!(layout.field("prev_state").unwrap().kind, FieldKind::Signed);
    let common_type = layout.field("common_type").unwrap();
    assert_eq!(common_type.kind, FieldKind::Unsigned);
    assert_eq!(layout.min_payload_len(), 64);
}

#[test]
fn test_id_falls_back_to_format_file() {
    // irq_handler_entry ships without an `id` file
    let dict = fixtures();

    let identity = dict.resolve("irq", "irq_handler_entry").unwrap();
    assert_eq!(identity.id, EventId(150));

    let layout = dict.layout_for(&identity).unwrap();
    assert_eq!(
        layout.field("name").unwrap().kind,
        FieldKind::DynamicString { relative: false }
    );
    assert_eq!(layout.field("irq").unwrap().kind, FieldKind::Signed);
}

#[test]
fn test_data_loc_byte_buffer_layout() {
    let dict = fixtures();

    let identity = dict.resolve("i2c", "i2c_write").unwrap();
    assert_eq!(identity.id, EventId(482));

    let layout = dict.layout_for(&identity).unwrap();
    let buf = layout.field("buf").unwrap();
    assert_eq!((buf.offset, buf.size), (20, 4));
    assert_eq!(buf.kind, FieldKind::DynamicBytes { relative: false });
    assert_eq!(layout.field("len").unwrap().kind, FieldKind::Unsigned);
}

#[test]
fn test_layouts_are_cached_by_id() {
    let dict = fixtures();
    assert!(dict.layout_by_id(EventId(512)).is_none());

    let identity = dict.resolve("power", "cpu_idle").unwrap();
    let first = dict.layout_for(&identity).unwrap();
    let cached = dict
        .layout_by_id(EventId(512))
        .expect("layout_for should populate the cache");

    assert!(std::sync::Arc::ptr_eq(&first, &cached));
}

#[test]
fn test_missing_event_is_not_found() {
    let dict = fixtures();

    match dict.resolve("power", "does_not_exist") {
        Err(TraceError::EventNotFound(name)) => assert_eq!(name, "power:does_not_exist"),
        other => panic!("expected EventNotFound, got {other:?}"),
    }

    // Path components are never joined blindly
    assert!(matches!(
        dict.resolve("..", "sched"),
        Err(TraceError::EventNotFound(_))
    ));
}

#[test]
fn test_malformed_format_is_unavailable() {
    let dict = fixtures();

    // The id resolves; only the field layout is broken
    let identity = dict.resolve("power", "broken_format").unwrap();
    assert_eq!(identity.id, EventId(777));

    match dict.layout_for(&identity) {
        Err(TraceError::FormatUnavailable { event, reason }) => {
            assert_eq!(event, "power:broken_format");
            assert!(reason.contains("size"), "unexpected reason: {reason}");
        }
        other => panic!("expected FormatUnavailable, got {other:?}"),
    }
    assert!(dict.layout_by_id(EventId(777)).is_none());
}
