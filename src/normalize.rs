//! Best-effort name cleanup for the digest.
//!
//! Both rules report whether they actually rewrote the name through
//! [`Normalized`], so callers can tell a cleaned value from a pass-through.

/// Outcome of a normalization rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// The rule applied and produced this value.
    Formatted(String),
    /// The rule did not apply; this is the input, untouched.
    Fallback(String),
}

impl Normalized {
    pub fn is_formatted(&self) -> bool {
        matches!(self, Normalized::Formatted(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Normalized::Formatted(s) | Normalized::Fallback(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Normalized::Formatted(s) | Normalized::Fallback(s) => s,
        }
    }
}

const GENERAL_SECTION: &str = "General";
const MEETING_PREFIX: &str = "Pertemuan";

/// `"3.Week"` becomes `"Pertemuan 3"`; `"General"` and anything without a
/// leading number before the first `.` stay as they are.
pub fn normalize_section(name: &str) -> Normalized {
    if name == GENERAL_SECTION {
        return Normalized::Fallback(name.to_string());
    }
    let head = name.split('.').next().unwrap_or_default();
    match head.trim().parse::<i64>() {
        Ok(n) => Normalized::Formatted(format!("{MEETING_PREFIX} {n}")),
        Err(_) => Normalized::Fallback(name.to_string()),
    }
}

/// Keep the longest `-` separated piece of an item name, trimmed.
///
/// Ties go to the earliest piece. A name with no non-blank piece is returned
/// unchanged.
pub fn normalize_item(name: &str) -> Normalized {
    let longest = name
        .split('-')
        .map(str::trim)
        .fold("", |best, piece| {
            if piece.chars().count() > best.chars().count() {
                piece
            } else {
                best
            }
        });

    if longest.is_empty() {
        Normalized::Fallback(name.to_string())
    } else {
        Normalized::Formatted(longest.to_string())
    }
}
