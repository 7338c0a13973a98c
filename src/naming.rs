//! Flag and environment variable names derived from store keys.
//!
//! A key such as `extra.float64Slice` is split into words at case changes,
//! letter/digit boundaries and any non-alphanumeric character, lowercased and
//! joined with dashes. A dash directly in front of a digit run is then dropped,
//! so type-like words stay intact:
//!
//! ```text
//! extra.float64Slice   -> extra-float64-slice   -> APP_EXTRA_FLOAT64_SLICE
//! database.MaxIdleConns -> database-max-idle-conns
//! auth.clientID        -> auth-client-id
//! ```

use std::sync::LazyLock;

use regex::Regex;

static DASH_BEFORE_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)").expect("digit-run regex is valid"));

/// Dash-case flag name for a dotted store key.
pub fn flag_name(key: &str) -> String {
    let dashed = words(key)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    DASH_BEFORE_DIGITS.replace_all(&dashed, "$1").into_owned()
}

/// Environment variable name: prefix plus the uppercased flag name with `-`
/// and `.` turned into `_`.
pub fn env_name(prefix: &str, flag: &str) -> String {
    format!("{prefix}{}", flag.to_uppercase().replace(['-', '.'], "_"))
}

fn words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(prev) = current.chars().last() {
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = (prev.is_lowercase() && (c.is_uppercase() || c.is_numeric()))
                || (prev.is_alphabetic() && c.is_numeric())
                || (prev.is_numeric() && c.is_alphabetic())
                || (prev.is_uppercase() && c.is_uppercase() && next_is_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
