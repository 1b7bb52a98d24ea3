//! Shared utility functions for provider adapters.

use es_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read an API key from the environment variable named in config.
pub fn resolve_key_env(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Config(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}

/// Map a vendor HTTP status to the domain error taxonomy.
///
/// 429 and 5xx are transient (retry + breaker); auth failures mean the
/// vendor is unusable as configured; 4xx input failures are terminal.
pub(crate) fn vendor_status_error(provider: &str, status: u16, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    match status {
        429 | 500..=599 => Error::VendorTransient {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {snippet}"),
        },
        401 | 403 => Error::VendorUnavailable {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {snippet}"),
        },
        400 | 404 | 415 | 422 => Error::InvalidFormat(format!(
            "{provider} rejected the request (HTTP {status}): {snippet}"
        )),
        _ => Error::VendorUnavailable {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {snippet}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_key_env_reads_set_variable() {
        std::env::set_var("ES_TEST_KEY_0451", "secret-value");
        assert_eq!(resolve_key_env("ES_TEST_KEY_0451").unwrap(), "secret-value");
        std::env::remove_var("ES_TEST_KEY_0451");
    }

    #[test]
    fn resolve_key_env_missing_names_the_variable() {
        let err = resolve_key_env("ES_TEST_MISSING_9999").unwrap_err();
        assert!(err.to_string().contains("ES_TEST_MISSING_9999"));
    }

    #[test]
    fn rate_limits_and_5xx_are_transient() {
        assert!(vendor_status_error("p", 429, "slow down").is_transient());
        assert!(vendor_status_error("p", 503, "unavailable").is_transient());
    }

    #[test]
    fn auth_and_input_failures_are_terminal() {
        assert!(!vendor_status_error("p", 401, "bad key").is_transient());
        assert!(!vendor_status_error("p", 415, "bad codec").is_transient());
        assert!(matches!(
            vendor_status_error("p", 400, "nope"),
            Error::InvalidFormat(_)
        ));
    }
}
