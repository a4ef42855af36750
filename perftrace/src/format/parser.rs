//! Parser for tracefs `format` files
//!
//! A format file looks like:
//!
//! ```text
//! name: sched_switch
//! ID: 316
//! format:
//!     field:unsigned short common_type;    offset:0;    size:2;    signed:0;
//!     field:char prev_comm[16];    offset:8;    size:16;    signed:0;
//!     field:__data_loc char[] name;    offset:24;    size:4;    signed:0;
//!
//! print fmt: "prev_comm=%s ...", REC->prev_comm
//! ```
//!
//! The kernel separates the attributes with tabs. Only the header lines and
//! `field:` lines matter; `print fmt` is ignored.

use thiserror::Error;

use super::layout::{FieldKind, FieldSpec};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatParseError {
    #[error("line {line}: missing `{attribute}` attribute")]
    MissingAttribute {
        line: usize,
        attribute: &'static str,
    },

    #[error("line {line}: invalid number `{value}`")]
    InvalidNumber { line: usize, value: String },

    #[error("line {line}: malformed field declaration `{decl}`")]
    MalformedDeclaration { line: usize, decl: String },

    #[error("no field declarations found")]
    NoFields,
}

/// Parsed content of one format file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFormat {
    pub name: Option<String>,
    pub id: Option<u32>,
    pub fields: Vec<FieldSpec>,
}

/// Parse the text of a tracefs `format` file
///
/// # Errors
/// Returns an error if a `field:` line lacks `offset`/`size`, carries a
/// non-numeric attribute, or if the file declares no field at all.
pub fn parse_format(text: &str) -> Result<ParsedFormat, FormatParseError> {
    let mut name = None;
    let mut id = None;
    let mut fields = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if let Some(value) = line.strip_prefix("name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("ID:") {
            id = Some(parse_number(value.trim(), line_no)?);
        } else if line.starts_with("field:") {
            fields.push(parse_field_line(line, line_no)?);
        } else if line.starts_with("print fmt:") {
            break;
        }
    }

    if fields.is_empty() {
        return Err(FormatParseError::NoFields);
    }

    Ok(ParsedFormat { name, id, fields })
}

/// Parse `field:<decl>;\toffset:N;\tsize:N;\tsigned:N;`
fn parse_field_line(line: &str, line_no: usize) -> Result<FieldSpec, FormatParseError> {
    let mut parts = line.split(';').map(str::trim).filter(|p| !p.is_empty());

    let decl = parts
        .next()
        .and_then(|p| p.strip_prefix("field:"))
        .map(str::trim)
        .unwrap_or_default();

    let mut offset = None;
    let mut size = None;
    let mut signed = false;

    for attr in parts {
        let Some((key, value)) = attr.split_once(':') else {
            continue;
        };
        match key.trim() {
            "offset" => offset = Some(parse_number(value.trim(), line_no)?),
            "size" => size = Some(parse_number(value.trim(), line_no)?),
            // Kernels older than 2.6.37 do not emit `signed`
            "signed" => signed = parse_number(value.trim(), line_no)? != 0,
            _ => {}
        }
    }

    let offset = offset.ok_or(FormatParseError::MissingAttribute {
        line: line_no,
        attribute: "offset",
    })?;
    let size = size.ok_or(FormatParseError::MissingAttribute {
        line: line_no,
        attribute: "size",
    })?;

    let Some((type_part, name, is_array)) = split_declaration(decl) else {
        return Err(FormatParseError::MalformedDeclaration {
            line: line_no,
            decl: decl.to_string(),
        });
    };

    let kind = classify(type_part, is_array, size as usize, signed);

    Ok(FieldSpec::new(name, offset as usize, size as usize, kind))
}

/// Split `unsigned long args[6]` into (`unsigned long`, `args`, true)
fn split_declaration(decl: &str) -> Option<(&str, &str, bool)> {
    let (type_part, last) = decl.rsplit_once(char::is_whitespace)?;
    let (type_part, last) = (type_part.trim(), last.trim());

    let last = last.trim_start_matches('*');
    let (name, is_array) = match last.find('[') {
        Some(bracket) => (&last[..bracket], true),
        None => (last, false),
    };

    if name.is_empty() || type_part.is_empty() {
        return None;
    }
    Some((type_part, name, is_array))
}

fn classify(type_part: &str, is_array: bool, size: usize, signed: bool) -> FieldKind {
    let relative = type_part.starts_with("__rel_loc");
    if relative || type_part.starts_with("__data_loc") {
        return if is_char_type(type_part) {
            FieldKind::DynamicString { relative }
        } else {
            FieldKind::DynamicBytes { relative }
        };
    }
    if is_array {
        return if is_char_type(type_part) {
            FieldKind::FixedString
        } else {
            FieldKind::Bytes
        };
    }
    match size {
        1 | 2 | 4 | 8 if signed => FieldKind::Signed,
        1 | 2 | 4 | 8 => FieldKind::Unsigned,
        _ => FieldKind::Bytes,
    }
}

/// Element type is `char` (`char`, `unsigned char`, `char[]`...)
fn is_char_type(type_part: &str) -> bool {
    type_part
        .split_whitespace()
        .any(|token| token.trim_end_matches("[]") == "char")
}

fn parse_number(value: &str, line: usize) -> Result<u32, FormatParseError> {
    value.parse().map_err(|_| FormatParseError::InvalidNumber {
        line,
        value: value.to_string(),
    })
}
