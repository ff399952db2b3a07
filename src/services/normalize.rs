// Phone number normalization to canonical Indonesian international form
//
// Model output lines are free text; this module finds a plausible mobile
// number inside a line and rewrites it to the `628...` form.

use regex::Regex;
use std::sync::OnceLock;

/// Marker the model is told to emit for images without a phone number.
pub const NOT_FOUND: &str = "TIDAK_DITEMUKAN";

/// Matches an Indonesian mobile number embedded in free text: `628` or `08`
/// followed by 8 to 11 digits, delimited by non-digits or line edges.
fn candidate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\D)((?:62|0)8\d{8,11})(?:\D|$)").unwrap())
}

/// Normalizes one raw model line.
///
/// Returns the canonical `628...` number when a candidate is found, the
/// not-found marker when the model reported one, or the trimmed line verbatim
/// when nothing in it looks like a number. Callers keep verbatim lines so the
/// operator can see what the model actually said.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let upper = trimmed.to_uppercase();
    if upper == NOT_FOUND || upper == "TIDAK DITEMUKAN" {
        return NOT_FOUND.to_string();
    }

    let Some(caps) = candidate_re().captures(trimmed) else {
        return trimmed.to_string();
    };
    let candidate = &caps[1];
    let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();

    if let Some(rest) = digits.strip_prefix("08") {
        format!("628{rest}")
    } else if digits.starts_with("62") {
        digits
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("62{rest}")
    } else {
        format!("628{digits}")
    }
}
