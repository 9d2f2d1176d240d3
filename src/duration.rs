#![forbid(unsafe_code)]

//! Parser for the ISO-8601 duration tokens returned in `contentDetails.duration`
//! (`PT4M13S`, `P1DT2H`, `PT0.5S`, ...).
//!
//! The parser is total. Anything it cannot read becomes `0`, which callers must
//! treat as "unknown". A real zero-length video also reports `0`, so the two
//! cases cannot be told apart downstream.

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;
const SECS_PER_WEEK: u64 = 7 * SECS_PER_DAY;

/// Converts a duration token into whole seconds, returning `0` for malformed
/// input. Fractional seconds are truncated.
pub fn parse_duration(raw: &str) -> u64 {
    parse_duration_checked(raw).unwrap_or(0)
}

/// Strict variant used by [`parse_duration`]; `None` means the token was not a
/// calendar-free ISO-8601 duration.
pub fn parse_duration_checked(raw: &str) -> Option<u64> {
    let body = raw.trim().strip_prefix('P')?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date, Some(time))
        }
        None => (body, None),
    };
    if date_part.is_empty() && time_part.is_none() {
        return None;
    }

    let mut total = 0u64;
    for (value, unit) in components(date_part)? {
        // Years and months have no fixed length without an anchor date.
        let scale = match unit {
            'W' => SECS_PER_WEEK,
            'D' => SECS_PER_DAY,
            _ => return None,
        };
        total = total.checked_add(whole(value)?.checked_mul(scale)?)?;
    }
    if let Some(time) = time_part {
        for (value, unit) in components(time)? {
            let seconds = match unit {
                'H' => whole(value)?.checked_mul(SECS_PER_HOUR)?,
                'M' => whole(value)?.checked_mul(SECS_PER_MINUTE)?,
                'S' => seconds(value)?,
                _ => return None,
            };
            total = total.checked_add(seconds)?;
        }
    }
    Some(total)
}

/// Splits `4M13S` into `[("4", 'M'), ("13", 'S')]`, rejecting repeated units,
/// empty numbers, and trailing digits without a designator.
fn components(part: &str) -> Option<Vec<(&str, char)>> {
    let mut out: Vec<(&str, char)> = Vec::new();
    let mut start = 0;
    for (idx, ch) in part.char_indices() {
        if ch.is_ascii_digit() || ch == '.' || ch == ',' {
            continue;
        }
        let value = &part[start..idx];
        if value.is_empty() || out.iter().any(|(_, unit)| *unit == ch) {
            return None;
        }
        out.push((value, ch));
        start = idx + ch.len_utf8();
    }
    if start != part.len() {
        return None;
    }
    Some(out)
}

fn whole(value: &str) -> Option<u64> {
    value.parse().ok()
}

fn seconds(value: &str) -> Option<u64> {
    let normalized = value.replace(',', ".");
    match normalized.split_once('.') {
        Some((int, frac)) => {
            if (int.is_empty() && frac.is_empty()) || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            if int.is_empty() { Some(0) } else { whole(int) }
        }
        None => whole(&normalized),
    }
}
