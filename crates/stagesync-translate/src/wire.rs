//! The context's persisted text encoding.
//!
//! One record per tracked path, `;`-terminated, fields comma-separated:
//!
//! ```text
//! path=translatorId,primaryNodeName[,createdNodeName]*[,uniquekey:<uint64>];
//! ```
//!
//! The primary field is always present and may be empty. Node names rather
//! than raw handles are written because the host may remap names on load;
//! handles are recovered through its lookup-by-name primitive afterwards.
//!
//! The excluded-geometry set is a plain comma-joined path list.
//!
//! Parsing reports one explicit error per malformed record so a bad record
//! can be skipped without abandoning the batch.

use stagesync_core::SyncError;

const UNIQUE_KEY_PREFIX: &str = "uniquekey:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRecord {
    pub path: String,
    pub translator_id: String,
    /// Primary node name; empty means no primary handle was serialized.
    pub primary: String,
    pub created: Vec<String>,
    pub unique_key: Option<u64>,
}

pub fn write_records(records: &[LookupRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.path);
        out.push('=');
        out.push_str(&record.translator_id);
        out.push(',');
        out.push_str(&record.primary);
        for name in &record.created {
            out.push(',');
            out.push_str(name);
        }
        if let Some(key) = record.unique_key {
            out.push(',');
            out.push_str(UNIQUE_KEY_PREFIX);
            out.push_str(&key.to_string());
        }
        out.push(';');
    }
    out
}

/// Parse the full record stream. Each element is an independent result so
/// callers can skip malformed records and keep the rest.
pub fn parse_records(text: &str) -> Vec<Result<LookupRecord, SyncError>> {
    text.split(';')
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(raw: &str) -> Result<LookupRecord, SyncError> {
    let malformed = |reason: &str| SyncError::MalformedRecord {
        record: raw.to_string(),
        reason: reason.to_string(),
    };

    let (path, fields) = raw.split_once('=').ok_or_else(|| malformed("missing '='"))?;
    if path.is_empty() {
        return Err(malformed("empty path"));
    }
    let mut fields = fields.split(',');
    let translator_id = fields.next().filter(|s| !s.is_empty());
    let Some(translator_id) = translator_id else {
        return Err(malformed("missing translator id"));
    };
    let primary = fields.next().ok_or_else(|| malformed("missing primary field"))?;

    let mut created = Vec::new();
    let mut unique_key = None;
    for field in fields {
        if let Some(digits) = field.strip_prefix(UNIQUE_KEY_PREFIX) {
            let key = digits
                .parse::<u64>()
                .map_err(|_| malformed("bad unique key"))?;
            unique_key = Some(key);
        } else if !field.is_empty() {
            created.push(field.to_string());
        }
    }

    Ok(LookupRecord {
        path: path.to_string(),
        translator_id: translator_id.to_string(),
        primary: primary.to_string(),
        created,
        unique_key,
    })
}

pub fn write_path_list(paths: &[String]) -> String {
    paths.join(",")
}

pub fn parse_path_list(text: &str) -> Vec<String> {
    text.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
