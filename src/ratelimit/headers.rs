//! Parse quota hints out of rate limit response headers.
//!
//! Reddit reports `x-ratelimit-used`, `x-ratelimit-remaining` and
//! `x-ratelimit-reset` (seconds until the window resets). Remaining and reset
//! are sometimes sent as decimals such as `598.0`.

use reqwest::header::HeaderMap;
use std::time::Duration;

use super::QuotaHints;

const REMAINING: &[&str] = &["x-ratelimit-remaining", "ratelimit-remaining"];
const USED: &[&str] = &["x-ratelimit-used", "ratelimit-used"];
const RESET: &[&str] = &["x-ratelimit-reset", "ratelimit-reset"];
const LIMIT: &[&str] = &["x-ratelimit-limit", "ratelimit-limit"];

/// Longest reset delay we accept from a server; larger values are clamped.
pub const MAX_RESET_IN: Duration = Duration::from_secs(24 * 60 * 60);

/// Extract [`QuotaHints`] from a response's headers.
///
/// Returns `None` when the response carries no usable quota header at all.
/// Without an explicit limit header the limit is inferred as
/// `used + remaining`.
pub fn parse_quota_hints(headers: &HeaderMap) -> Option<QuotaHints> {
    let remaining = parse_count(headers, REMAINING);
    let used = parse_count(headers, USED);
    let reset_in = parse_seconds(headers, RESET);
    let limit = parse_count(headers, LIMIT).or(match (used, remaining) {
        (Some(u), Some(r)) => Some(u.saturating_add(r)),
        _ => None,
    });

    if remaining.is_none() && reset_in.is_none() && limit.is_none() {
        return None;
    }

    Some(QuotaHints {
        limit,
        remaining,
        reset_in,
    })
}

fn parse_count(headers: &HeaderMap, names: &[&str]) -> Option<u32> {
    parse_number(headers, names).map(|v| v.floor().min(f64::from(u32::MAX)) as u32)
}

fn parse_seconds(headers: &HeaderMap, names: &[&str]) -> Option<Duration> {
    parse_number(headers, names)
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .map(|d| d.min(MAX_RESET_IN))
}

fn parse_number(headers: &HeaderMap, names: &[&str]) -> Option<f64> {
    for name in names {
        if let Some(value) = headers.get(*name) {
            if let Some(n) = value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|n| n.is_finite() && *n >= 0.0)
            {
                return Some(n);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn reddit_style_headers_infer_limit() {
        let h = headers(&[
            ("x-ratelimit-used", "4"),
            ("x-ratelimit-remaining", "596.0"),
            ("x-ratelimit-reset", "312"),
        ]);
        let hints = parse_quota_hints(&h).unwrap();
        assert_eq!(hints.remaining, Some(596));
        assert_eq!(hints.limit, Some(600));
        assert_eq!(hints.reset_in, Some(Duration::from_secs(312)));
    }

    #[test]
    fn explicit_limit_wins_over_inference() {
        let h = headers(&[
            ("x-ratelimit-limit", "100"),
            ("x-ratelimit-used", "4"),
            ("x-ratelimit-remaining", "96"),
        ]);
        assert_eq!(parse_quota_hints(&h).unwrap().limit, Some(100));
    }

    #[test]
    fn garbage_values_are_ignored() {
        let h = headers(&[
            ("x-ratelimit-remaining", "lots"),
            ("x-ratelimit-reset", "-5"),
        ]);
        assert_eq!(parse_quota_hints(&h), None);
    }

    #[test]
    fn absurd_reset_is_clamped() {
        let h = headers(&[
            ("x-ratelimit-remaining", "5"),
            ("x-ratelimit-reset", "1e19"),
        ]);
        let hints = parse_quota_hints(&h).unwrap();
        assert_eq!(hints.reset_in, Some(MAX_RESET_IN));
        assert_eq!(hints.remaining, Some(5));
    }

    #[test]
    fn no_headers_no_hints() {
        assert_eq!(parse_quota_hints(&HeaderMap::new()), None);
    }
}
