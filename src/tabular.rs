//! Plain-text table helpers shared by the observation and reanalysis loaders.
//!
//! Both inputs are comma-separated files with a header row. Parsing is
//! deliberately forgiving about formatting (quoted fields, several timestamp
//! layouts, `NaN`/`null` placeholders) and strict about structure (required
//! columns must exist).

use std::collections::HashMap;

// ============================================================================
// CSV Quote-Aware Parsing
// ============================================================================

/// Split a CSV line respecting quoted fields (handles commas inside quotes).
/// Returns owned strings because quoted fields need unquoting.
pub fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    // Escaped quote ("")
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Quote a field for output if it contains a delimiter or quote.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ============================================================================
// Header Lookup
// ============================================================================

/// Column name → index, matched case-insensitively on trimmed names.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn from_header(header: &str) -> Self {
        // Strip a UTF-8 BOM some spreadsheet exports prepend
        let header = header.trim_start_matches('\u{feff}');
        let names: Vec<String> = csv_split(header).into_iter().map(|c| c.trim().to_string()).collect();
        let mut lookup = HashMap::new();
        for (idx, name) in names.iter().enumerate() {
            // First occurrence wins on duplicate headers
            lookup.entry(name.to_lowercase()).or_insert(idx);
        }
        Self { names, lookup }
    }

    /// Index of `name`, if present.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.lookup.get(&name.trim().to_lowercase()).copied()
    }

    /// Index of the first of `aliases` present in the header.
    pub fn find_any(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|a| self.find(a))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// Field Parsing
// ============================================================================

/// Get an f64 field from a CSV row by optional column index.
///
/// Empty cells, `NaN`, `null`, `-` and non-finite numbers read as `None`.
pub fn get_f64(fields: &[String], idx: Option<usize>) -> Option<f64> {
    let s = fields.get(idx?)?.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null") || s == "-" {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Epoch values above this magnitude are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Parse various datetime string formats to a Unix timestamp in seconds.
///
/// Naive timestamps are taken as UTC. Bare numbers, integer or float, are
/// epoch seconds, or epoch milliseconds when larger than 10^11. Numeric
/// epochs outside chrono's representable range are rejected.
pub fn parse_datetime_string(s: &str) -> Result<i64, String> {
    let s = s.trim().trim_matches('"');

    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Err("Empty timestamp".to_string());
    }

    // Unix epoch (numeric)
    if let Ok(epoch) = s.parse::<i64>() {
        let secs = if epoch.unsigned_abs() > EPOCH_MILLIS_THRESHOLD as u64 { epoch / 1000 } else { epoch };
        return checked_epoch(secs).ok_or_else(|| format!("Timestamp out of range: '{}'", s));
    }
    if let Ok(epoch_f) = s.parse::<f64>() {
        if epoch_f.is_finite() {
            let secs = if epoch_f.abs() > EPOCH_MILLIS_THRESHOLD { epoch_f / 1000.0 } else { epoch_f };
            return epoch_from_f64(secs).ok_or_else(|| format!("Timestamp out of range: '{}'", s));
        }
    }

    // "2019-03-01 06:00:00+00:00"
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(dt.timestamp());
    }

    // ISO 8601 with timezone
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Ok(dt.timestamp());
    }

    // Without timezone (assume UTC)
    for fmt in &[
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M",
    ] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    // Date only, midnight UTC
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    Err(format!("Cannot parse timestamp: '{}'", s))
}

/// `secs` when chrono can represent it as a UTC datetime.
pub fn checked_epoch(secs: i64) -> Option<i64> {
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.timestamp())
}

/// Round fractional epoch seconds, rejecting values chrono cannot represent.
pub fn epoch_from_f64(secs: f64) -> Option<i64> {
    // i64::MAX is not exactly representable; anything at or past 2^63 saturates
    if !secs.is_finite() || secs.abs() >= 9.2e18 {
        return None;
    }
    checked_epoch(secs.round() as i64)
}

/// Render epoch seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_timestamp(epoch_secs: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}
