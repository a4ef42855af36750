//! Field extraction from tracepoint RAW payloads

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::format::{EventIdentity, FieldKind, FieldSpec, RecordLayout};

/// Value of one decoded field, borrowing from the record being dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue<'a> {
    Signed(i64),
    Unsigned(u64),
    Str(Cow<'a, str>),
    Bytes(&'a [u8]),
}

impl FieldValue<'_> {
    /// Integer view of the value, whatever its signedness
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Signed(v) => Some(v),
            Self::Unsigned(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Unsigned(v) => Some(v),
            Self::Signed(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Detach the value from the ring buffer scratch memory
    #[must_use]
    pub fn into_owned(self) -> OwnedFieldValue {
        match self {
            Self::Signed(v) => OwnedFieldValue::Signed(v),
            Self::Unsigned(v) => OwnedFieldValue::Unsigned(v),
            Self::Str(s) => OwnedFieldValue::Str(s.into_owned()),
            Self::Bytes(b) => OwnedFieldValue::Bytes(b.to_vec()),
        }
    }
}

/// [`FieldValue`] that outlives the dispatch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OwnedFieldValue {
    Signed(i64),
    Unsigned(u64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A RAW payload resolved into named values through its layout
///
/// `values[i]` belongs to `layout.fields[i]`; it is `None` when the field
/// does not fit in the payload.
#[derive(Debug, Clone)]
pub struct DecodedRecord<'a> {
    layout: Arc<RecordLayout>,
    values: Vec<Option<FieldValue<'a>>>,
}

impl<'a> DecodedRecord<'a> {
    #[must_use]
    pub fn identity(&self) -> &EventIdentity {
        &self.layout.identity
    }

    #[must_use]
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Decoded fields in layout order, skipping ones that did not fit
    pub fn fields(&self) -> impl Iterator<Item = (&FieldSpec, &FieldValue<'a>)> {
        self.layout
            .fields
            .iter()
            .zip(&self.values)
            .filter_map(|(spec, value)| value.as_ref().map(|v| (spec, v)))
    }

    /// Get a field value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue<'a>> {
        let index = self.layout.fields.iter().position(|f| f.name == name)?;
        self.values.get(index)?.as_ref()
    }

    #[must_use]
    pub fn unsigned(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_u64)
    }

    #[must_use]
    pub fn signed(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Owned copy of every decoded field, keyed by name
    #[must_use]
    pub fn to_owned_fields(&self) -> BTreeMap<String, OwnedFieldValue> {
        self.fields()
            .map(|(spec, v)| (spec.name.clone(), v.clone().into_owned()))
            .collect()
    }
}

/// Decode every field of `layout` out of `raw`
#[must_use]
pub fn decode_fields(layout: Arc<RecordLayout>, raw: &[u8]) -> DecodedRecord<'_> {
    let values = layout
        .fields
        .iter()
        .map(|spec| {
            let decoded = decode_field(spec, raw);
            if decoded.is_none() {
                debug!(
                    "{}: field {} ({}+{}) outside {}-byte payload",
                    layout.identity.qualified_name(),
                    spec.name,
                    spec.offset,
                    spec.size,
                    raw.len()
                );
            }
            decoded
        })
        .collect();

    DecodedRecord { layout, values }
}

/// Decode one field, `None` if its bytes are not all inside `raw`
#[must_use]
pub fn decode_field<'a>(spec: &FieldSpec, raw: &'a [u8]) -> Option<FieldValue<'a>> {
    let bytes = raw.get(spec.offset..spec.end())?;

    match spec.kind {
        FieldKind::Signed => signed(bytes).map(FieldValue::Signed),
        FieldKind::Unsigned => unsigned(bytes).map(FieldValue::Unsigned),
        FieldKind::FixedString => Some(FieldValue::Str(c_string(bytes))),
        FieldKind::DynamicString { relative } => {
            let text = dynamic_span(spec, bytes, raw, relative)?;
            Some(FieldValue::Str(c_string(text)))
        }
        FieldKind::DynamicBytes { relative } => {
            let data = dynamic_span(spec, bytes, raw, relative)?;
            Some(FieldValue::Bytes(data))
        }
        FieldKind::Bytes => Some(FieldValue::Bytes(bytes)),
    }
}

/// Resolve a `__data_loc` / `__rel_loc` descriptor: offset in the low 16
/// bits, length in the high 16
fn dynamic_span<'a>(
    spec: &FieldSpec,
    bytes: &[u8],
    raw: &'a [u8],
    relative: bool,
) -> Option<&'a [u8]> {
    let loc = u32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?);
    let mut start = (loc & 0xffff) as usize;
    let len = (loc >> 16) as usize;
    if relative {
        start += spec.end();
    }
    raw.get(start..start.checked_add(len)?)
}

fn signed(bytes: &[u8]) -> Option<i64> {
    Some(match bytes.len() {
        1 => i64::from(i8::from_ne_bytes([bytes[0]])),
        2 => i64::from(i16::from_ne_bytes(bytes.try_into().ok()?)),
        4 => i64::from(i32::from_ne_bytes(bytes.try_into().ok()?)),
        8 => i64::from_ne_bytes(bytes.try_into().ok()?),
        _ => return None,
    })
}

fn unsigned(bytes: &[u8]) -> Option<u64> {
    Some(match bytes.len() {
        1 => u64::from(bytes[0]),
        2 => u64::from(u16::from_ne_bytes(bytes.try_into().ok()?)),
        4 => u64::from(u32::from_ne_bytes(bytes.try_into().ok()?)),
        8 => u64::from_ne_bytes(bytes.try_into().ok()?),
        _ => return None,
    })
}

/// Character array up to the first NUL
fn c_string(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    fn layout(fields: Vec<FieldSpec>) -> Arc<RecordLayout> {
        Arc::new(RecordLayout::new(
            EventIdentity::new("test", "event", EventId(1)),
            fields,
        ))
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_u32_at_offset_eight() {
        let spec = FieldSpec::new("state", 8, 4, FieldKind::Unsigned);
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);

        assert_eq!(decode_field(&spec, &raw), Some(FieldValue::Unsigned(1)));
    }

    #[test]
    fn test_sign_extension() {
        let raw = [0xffu8, 0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let byte = FieldSpec::new("b", 0, 1, FieldKind::Signed);
        let word = FieldSpec::new("w", 0, 2, FieldKind::Signed);
        let long = FieldSpec::new("l", 0, 8, FieldKind::Signed);

        assert_eq!(decode_field(&byte, &raw), Some(FieldValue::Signed(-1)));
        let want = i64::from(i16::from_ne_bytes([0xff, 0xfe]));
        assert_eq!(decode_field(&word, &raw), Some(FieldValue::Signed(want)));

        let long_value = decode_field(&long, &raw).and_then(|v| v.as_i64());
        assert!(long_value.is_some_and(i64::is_negative));

        let unsigned_byte = FieldSpec::new("u", 0, 1, FieldKind::Unsigned);
        assert_eq!(
            decode_field(&unsigned_byte, &raw),
            Some(FieldValue::Unsigned(255))
        );
    }

    #[test]
    fn test_fixed_string_trimmed_at_nul() {
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(b"swapper/0\0\0\0\0\0\0\0");
        let spec = FieldSpec::new("prev_comm", 8, 16, FieldKind::FixedString);

        let value = decode_field(&spec, &raw).unwrap();
        assert_eq!(value.as_str(), Some("swapper/0"));
    }

    #[test]
    fn test_dynamic_string() {
        let mut raw = vec![0u8; 8];
        let loc: u32 = (6 << 16) | 12; // 6 bytes at offset 12
        raw.extend_from_slice(&loc.to_ne_bytes());
        raw.extend_from_slice(b"eth0\0\0");

        let spec = FieldSpec::new("name", 8, 4, FieldKind::DynamicString { relative: false });
        assert_eq!(decode_field(&spec, &raw).unwrap().as_str(), Some("eth0"));
    }

    #[test]
    fn test_relative_dynamic_string() {
        let mut raw = vec![0u8; 8];
        let loc: u32 = (3 << 16) | 4; // 3 bytes, 4 past the end of the field
        raw.extend_from_slice(&loc.to_ne_bytes());
        raw.extend_from_slice(&[0, 0, 0, 0]);
        raw.extend_from_slice(b"abc");

        let spec = FieldSpec::new("label", 8, 4, FieldKind::DynamicString { relative: true });
        assert_eq!(decode_field(&spec, &raw).unwrap().as_str(), Some("abc"));
    }

    #[test]
    fn test_dynamic_string_out_of_bounds() {
        let mut raw = vec![0u8; 8];
        let loc: u32 = (64 << 16) | 12;
        raw.extend_from_slice(&loc.to_ne_bytes());

        let spec = FieldSpec::new("name", 8, 4, FieldKind::DynamicString { relative: false });
        assert_eq!(decode_field(&spec, &raw), None);
    }

    #[test]
    fn test_dynamic_bytes_keep_nul() {
        let mut raw = vec![0u8; 8];
        let loc: u32 = (4 << 16) | 12; // 4 bytes at offset 12
        raw.extend_from_slice(&loc.to_ne_bytes());
        raw.extend_from_slice(&[0x00, 0x01, 0xff, 0x02]);

        let spec = FieldSpec::new("buf", 8, 4, FieldKind::DynamicBytes { relative: false });
        assert_eq!(
            decode_field(&spec, &raw),
            Some(FieldValue::Bytes(&[0x00, 0x01, 0xff, 0x02]))
        );

        let owned = decode_fields(layout(vec![spec]), &raw).to_owned_fields();
        assert_eq!(owned["buf"], OwnedFieldValue::Bytes(vec![0, 1, 255, 2]));
    }

    #[test]
    fn test_decode_record_skips_fields_past_end() {
        let layout = layout(vec![
            FieldSpec::new("common_type", 0, 2, FieldKind::Unsigned),
            FieldSpec::new("state", 8, 4, FieldKind::Unsigned),
            FieldSpec::new("cpu_id", 12, 4, FieldKind::Unsigned),
        ]);
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(&3u32.to_ne_bytes());

        let decoded = decode_fields(layout, &raw);
        assert_eq!(decoded.unsigned("state"), Some(3));
        assert_eq!(decoded.get("cpu_id"), None);
        assert_eq!(decoded.fields().count(), 2);
        assert_eq!(decoded.identity().qualified_name(), "test:event");
    }

    #[test]
    fn test_owned_fields() {
        let layout = layout(vec![
            FieldSpec::new("comm", 0, 4, FieldKind::FixedString),
            FieldSpec::new("mac", 4, 2, FieldKind::Bytes),
        ]);
        let raw = b"ab\0\0\x01\x02";
        let owned = decode_fields(layout, raw).to_owned_fields();

        assert_eq!(owned["comm"], OwnedFieldValue::Str("ab".to_string()));
        assert_eq!(owned["mac"], OwnedFieldValue::Bytes(vec![1, 2]));
    }
}
