//! Turns destination send errors into queue decisions.
//!
//! A rate limit without a usable retry-after (missing, unparsable or longer
//! than a day) is treated as transient, so the head entry stays bounded by the
//! retry ceiling instead of waiting forever.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::telegram::SendError;

const TOO_MANY_REQUESTS: u16 = 429;

/// Longest rate-limit pause honoured.
pub const MAX_RETRY_AFTER_SECS: u64 = 24 * 60 * 60;

/// Description fragments Telegram uses when it cannot render a payload.
const FORMAT_SIGNALS: &[&str] = &[
    "can't parse entities",
    "can't find end of",
    "unsupported start tag",
    "message text is empty",
    "text must be non-empty",
    "message is too long",
];

static RETRY_AFTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)retry after (\d+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    RateLimited(u64),
    FormatRejected,
    TransientFailure,
}

pub fn classify(err: &SendError) -> Failure {
    match err {
        SendError::Transport(_) => Failure::TransientFailure,
        SendError::Api {
            code,
            description,
            retry_after,
        } => {
            let lowered = description.to_ascii_lowercase();
            if *code == TOO_MANY_REQUESTS || lowered.contains("too many requests") {
                return retry_after
                    .map(u64::from)
                    .or_else(|| parse_retry_after(description))
                    .filter(|secs| *secs <= MAX_RETRY_AFTER_SECS)
                    .map(Failure::RateLimited)
                    .unwrap_or(Failure::TransientFailure);
            }
            if FORMAT_SIGNALS.iter().any(|s| lowered.contains(s)) {
                return Failure::FormatRejected;
            }
            Failure::TransientFailure
        }
    }
}

fn parse_retry_after(description: &str) -> Option<u64> {
    RETRY_AFTER
        .captures(description)
        .and_then(|c| c[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: u16, description: &str, retry_after: Option<u32>) -> SendError {
        SendError::Api {
            code,
            description: description.to_string(),
            retry_after,
        }
    }

    #[test]
    fn rate_limit_uses_structured_retry_after() {
        let err = api(429, "Too Many Requests", Some(35));
        assert_eq!(classify(&err), Failure::RateLimited(35));
    }

    #[test]
    fn rate_limit_parses_description() {
        let err = api(429, "Too Many Requests: retry after 12", None);
        assert_eq!(classify(&err), Failure::RateLimited(12));
    }

    #[test]
    fn rate_limit_without_duration_is_transient() {
        let err = api(429, "Too Many Requests", None);
        assert_eq!(classify(&err), Failure::TransientFailure);
    }

    #[test]
    fn absurd_retry_after_is_transient() {
        let err = api(429, "Too Many Requests: retry after 18446744073709551615", None);
        assert_eq!(classify(&err), Failure::TransientFailure);
        let err = api(429, "Too Many Requests: retry after 99999999999999999999999", None);
        assert_eq!(classify(&err), Failure::TransientFailure);
        let err = api(429, "Too Many Requests", Some(u32::MAX));
        assert_eq!(classify(&err), Failure::TransientFailure);
        let err = api(429, "Too Many Requests", Some(86_400));
        assert_eq!(classify(&err), Failure::RateLimited(86_400));
    }

    #[test]
    fn entity_errors_are_format_rejections() {
        let err = api(
            400,
            "Bad Request: can't parse entities: Unsupported start tag \"foo\" at byte offset 3",
            None,
        );
        assert_eq!(classify(&err), Failure::FormatRejected);
        let err = api(400, "Bad Request: message is too long", None);
        assert_eq!(classify(&err), Failure::FormatRejected);
    }

    #[test]
    fn everything_else_is_transient() {
        assert_eq!(
            classify(&api(502, "Bad Gateway", None)),
            Failure::TransientFailure
        );
        assert_eq!(
            classify(&api(400, "Bad Request: chat not found", None)),
            Failure::TransientFailure
        );
        assert_eq!(
            classify(&SendError::Transport("connection reset".into())),
            Failure::TransientFailure
        );
    }
}
