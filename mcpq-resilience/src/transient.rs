//! Transient-error classification
//!
//! Two tiers: system error codes (the reliable signal) and message-based
//! heuristics for errors that arrive as opaque strings from the MCP client
//! library or an HTTP stack. The heuristics are deliberately narrow; an
//! unrecognised failure is terminal.

use regex::RegexSet;
use std::sync::OnceLock;

/// System error codes that always classify as transient.
const TRANSIENT_CODES: [&str; 8] = [
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EPIPE",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "EAI_AGAIN",
];

fn message_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            // Retryable HTTP status at the very start of the message
            r"(?i)^\s*(502|503|504|429)\b",
            // ... or after an http/status token
            r"(?i)\b(?:http|status(?:\s+code)?)\s*[:=]?\s*(502|503|504|429)\b",
            // ... or followed by its canonical reason phrase
            r"(?i)\b502\s+bad\s+gateway\b",
            r"(?i)\b503\s+service\s+unavailable\b",
            r"(?i)\b504\s+gateway\s+time-?out\b",
            r"(?i)\b429\s+too\s+many\s+requests\b",
            // Bare timeout token
            r"(?i)\btimeout\b",
            // Narrow network/connection phrases
            r"(?i)\bnetwork\b[^.,;]{0,40}\b(error|fail\w*|unavailable|timeout)\b",
            r"(?i)\bconnection\b[^.,;]{0,40}\b(reset|refused|timeout)\b",
        ])
        .expect("valid regex set")
    })
}

/// Whether a failure, rendered as a message, is worth retrying.
pub fn is_transient_message(message: &str) -> bool {
    if TRANSIENT_CODES.iter().any(|code| {
        message
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|token| token == *code)
    }) {
        return true;
    }
    message_patterns().is_match(message)
}
