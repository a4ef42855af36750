//! Text rendering of records and run statistics

use std::fmt::Write as _;

use crate::decode::OwnedFieldValue;
use crate::handler::{OwnedBody, OwnedRecord};

use super::CollectorStats;

/// One-line rendering of a record for headless output
#[must_use]
pub fn format_record(record: &OwnedRecord) -> String {
    match &record.body {
        OwnedBody::Tracepoint {
            event,
            common_type,
            pid: process,
            tid: thread,
            time,
            fields,
        } => {
            let mut line = format!("[{}]", record.cpu);
            if let Some(time) = time {
                let _ = write!(line, " {:.6}", time.as_seconds());
            }
            match (event, common_type) {
                (Some(event), _) => {
                    let _ = write!(line, " {event}");
                }
                (None, Some(common_type)) => {
                    let _ = write!(line, " type={common_type}");
                }
                (None, None) => line.push_str(" <undecoded>"),
            }
            if let (Some(process), Some(thread)) = (process, thread) {
                let _ = write!(line, " pid={process} tid={thread}");
            }
            let event_fields = fields
                .iter()
                .filter(|(name, _)| !name.starts_with("common_"));
            for (name, value) in event_fields {
                let _ = write!(line, " {name}={}", format_value(value));
            }
            line
        }
        OwnedBody::Lost { lost } => format!("[{}] LOST {lost} records", record.cpu),
        OwnedBody::Other { record_type, size } => {
            format!("[{}] record type={record_type} size={size}", record.cpu)
        }
    }
}

fn format_value(value: &OwnedFieldValue) -> String {
    match value {
        OwnedFieldValue::Signed(v) => v.to_string(),
        OwnedFieldValue::Unsigned(v) => v.to_string(),
        OwnedFieldValue::Str(s) => s.clone(),
        OwnedFieldValue::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                let _ = write!(hex, "{byte:02x}");
            }
            hex
        }
    }
}

/// Display collection statistics
pub fn display_statistics(stats: &CollectorStats) {
    let totals = stats.totals();
    eprintln!(
        "stats: sources={} records={} lost={} corrupt={} dropped={}",
        stats.sources.len(),
        totals.records,
        totals.lost,
        totals.corrupt,
        stats.dropped()
    );
    for source in &stats.sources {
        eprintln!(
            "  {} {}: records={} bytes={} lost={} corrupt={}",
            source.event,
            source.cpu,
            source.stats.records,
            source.stats.bytes,
            source.stats.lost,
            source.stats.corrupt
        );
    }
    for failure in &stats.failed {
        eprintln!(
            "  {} {}: not opened ({})",
            failure.event, failure.cpu, failure.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, Timestamp};
    use std::collections::BTreeMap;

    #[test]
    fn test_format_tracepoint() {
        let mut fields = BTreeMap::new();
        fields.insert("common_pid".to_string(), OwnedFieldValue::Signed(0));
        fields.insert("state".to_string(), OwnedFieldValue::Unsigned(1));
        fields.insert("name".to_string(), OwnedFieldValue::Str("eth0".to_string()));
        fields.insert("mac".to_string(), OwnedFieldValue::Bytes(vec![0xde, 0xad]));

        let record = OwnedRecord {
            cpu: CpuId(3),
            body: OwnedBody::Tracepoint {
                event: Some("power:cpu_idle".to_string()),
                common_type: Some(512),
                pid: Some(0),
                tid: Some(0),
                time: Some(Timestamp(1_500_000_000)),
                fields,
            },
        };

        assert_eq!(
            format_record(&record),
            "[CPU:3] 1.500000 power:cpu_idle pid=0 tid=0 mac=dead name=eth0 state=1"
        );
    }

    #[test]
    fn test_format_other_records() {
        let lost = OwnedRecord {
            cpu: CpuId(0),
            body: OwnedBody::Lost { lost: 4 },
        };
        assert_eq!(format_record(&lost), "[CPU:0] LOST 4 records");

        let undecoded = OwnedRecord {
            cpu: CpuId(1),
            body: OwnedBody::Tracepoint {
                event: None,
                common_type: Some(77),
                pid: None,
                tid: None,
                time: None,
                fields: BTreeMap::new(),
            },
        };
        assert_eq!(format_record(&undecoded), "[CPU:1] type=77");
    }
}
