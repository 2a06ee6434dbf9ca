//! Pure display helpers for the command implementations.
//!
//! Size and age formatting applies to the table format only; JSON and CSV
//! output keeps raw numbers so downstream tooling can parse them. The
//! interval and timestamp cleanups apply in every format.

const SIZE_UNITS: [(&str, i64); 4] =
    [("TB", 1 << 40), ("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

// The megabyte suffix really is a bare "M" here, matching the wider spacing
// of the other units in dense columns.
const COMPACT_SIZE_UNITS: [(&str, i64); 4] =
    [("TB", 1 << 40), ("GB", 1 << 30), ("M", 1 << 20), ("KB", 1 << 10)];

/// Human-readable byte size: "1.5 GB", "512B". Zero or missing shows as a
/// dash.
pub fn fmt_size(bytes: Option<i64>) -> String {
    let b = bytes.unwrap_or(0);
    if b <= 0 {
        return "-".to_string();
    }
    scaled(b, &SIZE_UNITS, " ").unwrap_or_else(|| format!("{b}B"))
}

/// Compact byte size for dense columns and summaries: "2.0KB", "300M".
/// Zero or missing shows as "0B".
pub fn format_size_compact(bytes: Option<i64>) -> String {
    let b = bytes.unwrap_or(0);
    if b <= 0 {
        return "0B".to_string();
    }
    scaled(b, &COMPACT_SIZE_UNITS, "").unwrap_or_else(|| format!("{b}B"))
}

fn scaled(b: i64, units: &[(&str, i64)], separator: &str) -> Option<String> {
    for (suffix, threshold) in units {
        if b >= *threshold {
            let value = b as f64 / *threshold as f64;
            return Some(if value >= 10.0 {
                format!("{value:.0}{separator}{suffix}")
            } else {
                format!("{value:.1}{separator}{suffix}")
            });
        }
    }
    None
}

/// Short duration: "45s", "5m", "3h", "2d". Missing durations are empty.
pub fn format_duration_human(seconds: Option<f64>) -> String {
    let Some(s) = seconds else {
        return String::new();
    };
    if s < 60.0 {
        format!("{}s", s as i64)
    } else if s < 3600.0 {
        format!("{}m", (s / 60.0) as i64)
    } else if s < 86400.0 {
        format!("{}h", (s / 3600.0) as i64)
    } else {
        format!("{}d", (s / 86400.0) as i64)
    }
}

/// "5m ago" for an elapsed-seconds value; empty when missing.
pub fn format_relative_time(seconds: Option<f64>) -> String {
    match seconds {
        Some(_) => format!("{} ago", format_duration_human(seconds)),
        None => String::new(),
    }
}

/// Human form of a PostgreSQL interval string: "01:00:00" becomes "1 hour",
/// "1 mon" becomes "1 month". Already-readable strings pass through.
/// Missing values show as a dash.
pub fn normalize_pg_interval(value: Option<&str>) -> String {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return "-".to_string();
    };

    if let Some(total) = parse_clock(raw) {
        if total == 0 {
            return "0 seconds".to_string();
        }
        let days = total / 86_400;
        let hours = total % 86_400 / 3_600;
        let minutes = total % 3_600 / 60;
        let seconds = total % 60;
        let mut parts = Vec::new();
        for (amount, unit) in
            [(days, "day"), (hours, "hour"), (minutes, "minute"), (seconds, "second")]
        {
            if amount != 0 {
                let plural = if amount == 1 { "" } else { "s" };
                parts.push(format!("{amount} {unit}{plural}"));
            }
        }
        return parts.join(" ");
    }

    raw.split_whitespace()
        .map(|word| match word {
            "mon" => "month",
            "mons" => "months",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `HH:MM:SS` with two-digit minutes and seconds, the way PostgreSQL prints
/// intervals under a day. Anything else is not clock-shaped.
fn parse_clock(value: &str) -> Option<u64> {
    let (hours, rest) = value.split_once(':')?;
    let (minutes, seconds) = rest.split_once(':')?;
    if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if minutes.len() != 2 || seconds.len() != 2 {
        return None;
    }
    let h: u64 = hours.parse().ok()?;
    let m: u64 = minutes.parse().ok()?;
    let s: u64 = seconds.parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

/// Strip sub-second precision and the UTC offset from a PostgreSQL
/// timestamp string. Missing and infinite timestamps show as a dash.
pub fn format_timestamp(value: Option<&str>) -> String {
    let Some(ts) = value.filter(|v| !v.is_empty()) else {
        return "-".to_string();
    };
    if ts == "infinity" || ts == "-infinity" {
        return "-".to_string();
    }
    if let Some((head, _)) = ts.split_once('.') {
        head.to_string()
    } else if let Some((head, _)) = ts.split_once('+') {
        head.to_string()
    } else {
        ts.to_string()
    }
}

/// Split `schema.table`, defaulting to the `public` schema.
pub fn parse_table_arg(value: &str) -> (String, String) {
    match value.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => ("public".to_string(), value.to_string()),
    }
}
