use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,4}").unwrap();
    static ref BEARER_REGEX: Regex = Regex::new(r"(?i)\bbearer\s+[a-z0-9._~+/=-]+").unwrap();
}

/// Masks e-mail addresses and bearer credentials before they reach the log stream.
pub fn mask_pii(input: &str) -> String {
    let masked = EMAIL_REGEX.replace_all(input, "***@***.***");
    BEARER_REGEX.replace_all(&masked, "Bearer ***").into_owned()
}
