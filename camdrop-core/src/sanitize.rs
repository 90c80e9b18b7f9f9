//! Scrubbing of error text before it reaches logs or admission results.
//!
//! Absolute paths are reduced to their file name and credential-shaped
//! substrings are masked.

use once_cell::sync::Lazy;
use regex::Regex;

const MASK: &str = "***";

static URL_USERINFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<scheme>[a-zA-Z][a-zA-Z0-9+.-]*://)(?P<userinfo>[^/@\s]+)@")
        .expect("static regex")
});

static CREDENTIAL_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?P<key>password|passwd|pwd|secret|token|api[_-]?key|access[_-]?key|auth)(?P<sep>\s*[=:]\s*)(?P<value>[^\s&,;]+)",
    )
    .expect("static regex")
});

static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+").expect("static regex"));

// A path starts at the beginning of the message or after whitespace, a quote,
// `(`, `=` or `[`, so the `//host/...` part of a URL never qualifies.
// Directory segments may contain spaces but never start or end with one.
static UNIX_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<pre>^|[\s'\x22(=\[])(?:/[^/\s:'\x22,;()](?:[^/\n\r\t:'\x22,;()]*[^/\s:'\x22,;()])?)+/(?P<name>[^/\s:'\x22,;()]+)",
    )
    .expect("static regex")
});

static WINDOWS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[A-Za-z]:\\(?:[^\\\s:'\x22,;()](?:[^\\\n\r\t:'\x22,;()]*[^\\\s:'\x22,;()])?\\)*(?P<name>[^\\\s:'\x22,;()]+)",
    )
    .expect("static regex")
});

/// Redact paths and credentials from a message intended for logs or callers.
pub fn sanitize_error_message(message: &str) -> String {
    let scrubbed = URL_USERINFO.replace_all(message, format!("${{scheme}}{MASK}@"));
    let scrubbed = CREDENTIAL_PAIR.replace_all(&scrubbed, format!("${{key}}${{sep}}{MASK}"));
    let scrubbed = BEARER.replace_all(&scrubbed, format!("Bearer {MASK}"));
    let scrubbed = UNIX_PATH.replace_all(&scrubbed, "${pre}${name}");
    let scrubbed = WINDOWS_PATH.replace_all(&scrubbed, "$name");
    scrubbed.into_owned()
}

/// Mask the userinfo section of a connection URL, leaving host and path.
pub fn redact_url(url: &str) -> String {
    URL_USERINFO
        .replace_all(url, format!("${{scheme}}{MASK}@"))
        .into_owned()
}
