/// Shared error type used across all EchoScribe crates.
///
/// Business variants carry a stable numeric wire code (see [`Error::code`])
/// so the gateway can render the `{code, message, data, traceId}` envelope
/// without a separate mapping table.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A single provider's quota lane is exhausted.
    #[error("quota exhausted for {provider}/{variant}")]
    QuotaExhausted { provider: String, variant: String },

    /// Every candidate provider is quota-exhausted.
    #[error("all quotas exhausted for {service_type}")]
    AllQuotasExhausted { service_type: String },

    /// The selector found no usable candidate at all.
    #[error("no provider available for {service_type}: {reason}")]
    NoProviderAvailable {
        service_type: String,
        reason: String,
    },

    /// A caller-pinned provider failed the breaker/quota gate.
    /// Selection never silently substitutes in this case.
    #[error("preferred provider {provider} unavailable: {reason}")]
    PreferredUnavailable { provider: String, reason: String },

    /// Vendor-side failure worth retrying (network, 5xx, rate limit).
    #[error("provider {provider}: {message}")]
    VendorTransient { provider: String, message: String },

    /// Vendor-side failure that retrying will not fix.
    #[error("provider {provider} unavailable: {message}")]
    VendorUnavailable { provider: String, message: String },

    /// The media/input could not be understood by the vendor.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable numeric wire code for the response envelope.
    ///
    /// Ranges: 0 success, 400xx parameter, 401xx auth, 403xx authorization,
    /// 404xx not found, 409xx business conflict, 500xx system, 510xx vendor.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidParam(_) | Error::InvalidFormat(_) => 40000,
            Error::PermissionDenied(_) => 40300,
            Error::NotFound(_) => 40400,
            Error::Conflict(_) => 40900,
            Error::QuotaExhausted { .. } => 40910,
            Error::AllQuotasExhausted { .. } => 40911,
            Error::Io(_) | Error::Database(_) | Error::Config(_) | Error::Json(_) => 50000,
            Error::Cancelled => 50001,
            Error::Http(_)
            | Error::Timeout(_)
            | Error::VendorTransient { .. }
            | Error::VendorUnavailable { .. }
            | Error::NoProviderAvailable { .. }
            | Error::PreferredUnavailable { .. } => 51000,
            Error::Other(_) => 50000,
        }
    }

    /// Whether the pipeline retry policy applies to this error.
    ///
    /// Network trouble, timeouts, and vendor 5xx-class failures are worth
    /// retrying; input, permission, and quota errors are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::VendorTransient { .. }
        )
    }

    /// Whether the circuit breaker should tally this error.
    /// Only vendor-side failures count; caller mistakes do not.
    pub fn is_vendor_failure(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Timeout(_)
                | Error::VendorTransient { .. }
                | Error::VendorUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_land_in_documented_ranges() {
        assert_eq!(Error::InvalidParam("x".into()).code(), 40000);
        assert_eq!(Error::NotFound("t".into()).code(), 40400);
        assert_eq!(
            Error::QuotaExhausted {
                provider: "a".into(),
                variant: "file".into()
            }
            .code(),
            40910
        );
        assert_eq!(
            Error::AllQuotasExhausted {
                service_type: "asr".into()
            }
            .code(),
            40911
        );
        assert_eq!(Error::Timeout("t".into()).code(), 51000);
        assert_eq!(Error::Database("d".into()).code(), 50000);
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("t".into()).is_transient());
        assert!(Error::VendorTransient {
            provider: "p".into(),
            message: "503".into()
        }
        .is_transient());
        assert!(!Error::InvalidFormat("bad codec".into()).is_transient());
        assert!(!Error::QuotaExhausted {
            provider: "p".into(),
            variant: "file".into()
        }
        .is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn breaker_tallies_only_vendor_failures() {
        assert!(Error::VendorUnavailable {
            provider: "p".into(),
            message: "down".into()
        }
        .is_vendor_failure());
        assert!(!Error::InvalidParam("x".into()).is_vendor_failure());
        assert!(!Error::NotFound("x".into()).is_vendor_failure());
    }
}
