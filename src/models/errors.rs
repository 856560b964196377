//! Sentinel error taxonomy
//!
//! Every failure carries a unique code so a stage failure can be grepped in
//! production logs. Codes follow the pattern CATEGORY_SPECIFIC_ERROR:
//! - NET_xxx: transient network / RPC errors (retry with backoff)
//! - PROVIDER_xxx: an external service is down (fall back or degrade)
//! - RESP_xxx: malformed responses (analysis failure, never a crash)
//! - CHAIN_xxx: on-chain submission failures (retried, then skipped)
//! - CFG_xxx / DB_xxx / API_xxx: configuration, storage and HTTP API errors

use std::fmt;

/// Error raised by any pipeline stage
#[derive(Debug)]
pub struct AppError {
    /// Stable code, grepped for in logs
    pub code: ErrorCode,
    /// What went wrong, for operators
    pub message: String,
    /// Wrapped lower-level failure, if any
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a lower-level error under `code`
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Code rendered for log fields
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    /// Shortcut for `self.code.is_retryable()`
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Taxonomy bucket this error falls into
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Coarse failure classes. Each stage decides how to degrade from this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    ProviderUnavailable,
    MalformedResponse,
    OnChainSubmission,
    Config,
    Storage,
    Api,
    Other,
}

/// Stable error codes, grouped by taxonomy bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Transient network (1xx)
    // ============================================
    /// Connection refused / reset
    NetConnectionFailed,
    /// Request exceeded its timeout
    NetTimeout,
    /// HTTP 429 from any upstream
    NetRateLimited,
    /// JSON-RPC error object returned
    NetRpcError,
    /// Every endpoint in the pool failed
    NetNoEndpoints,
    /// WebSocket dropped
    NetWsDisconnected,

    // ============================================
    // Provider unavailable (2xx)
    // ============================================
    /// LLM provider returned an error status
    ProviderLlmFailed,
    /// No LLM provider configured
    ProviderLlmNotConfigured,
    /// Scam pre-filter API failed
    ProviderPreFilterFailed,
    /// Price oracle failed
    ProviderPriceFailed,
    /// Telegram Bot API failed
    ProviderTelegramFailed,

    // ============================================
    // Malformed responses (3xx)
    // ============================================
    /// Response body could not be decoded
    RespInvalidJson,
    /// LLM answered but not with a verdict object
    RespInvalidVerdict,
    /// Hex quantity / address could not be parsed
    RespInvalidHex,

    // ============================================
    // On-chain submission (4xx)
    // ============================================
    /// Transaction could not be sent
    ChainSubmitFailed,
    /// Transaction mined but reverted
    ChainReverted,
    /// Receipt not seen before timeout
    ChainReceiptTimeout,
    /// Signer or contract missing
    ChainNotConfigured,

    // ============================================
    // Configuration (5xx)
    // ============================================
    /// Required variable not set
    ConfigMissingEnv,
    /// Variable set but unparseable or out of range
    ConfigInvalidValue,

    // ============================================
    // Storage (6xx)
    // ============================================
    /// SQLite error
    DbError,
    /// Connection mutex poisoned
    DbPoisoned,

    // ============================================
    // API (7xx)
    // ============================================
    /// Malformed path or query
    ApiBadRequest,
    /// `X-API-Key` missing or wrong
    ApiUnauthorized,
    /// Resource not found
    ApiNotFound,
    /// Internal server error
    ApiInternalError,

    // ============================================
    // Generic (9xx)
    // ============================================
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Code as written to logs and API bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetConnectionFailed => "NET_CONNECTION_FAILED",
            Self::NetTimeout => "NET_TIMEOUT",
            Self::NetRateLimited => "NET_RATE_LIMITED",
            Self::NetRpcError => "NET_RPC_ERROR",
            Self::NetNoEndpoints => "NET_NO_ENDPOINTS",
            Self::NetWsDisconnected => "NET_WS_DISCONNECTED",

            Self::ProviderLlmFailed => "PROVIDER_LLM_FAILED",
            Self::ProviderLlmNotConfigured => "PROVIDER_LLM_NOT_CONFIGURED",
            Self::ProviderPreFilterFailed => "PROVIDER_PREFILTER_FAILED",
            Self::ProviderPriceFailed => "PROVIDER_PRICE_FAILED",
            Self::ProviderTelegramFailed => "PROVIDER_TELEGRAM_FAILED",

            Self::RespInvalidJson => "RESP_INVALID_JSON",
            Self::RespInvalidVerdict => "RESP_INVALID_VERDICT",
            Self::RespInvalidHex => "RESP_INVALID_HEX",

            Self::ChainSubmitFailed => "CHAIN_SUBMIT_FAILED",
            Self::ChainReverted => "CHAIN_REVERTED",
            Self::ChainReceiptTimeout => "CHAIN_RECEIPT_TIMEOUT",
            Self::ChainNotConfigured => "CHAIN_NOT_CONFIGURED",

            Self::ConfigMissingEnv => "CFG_MISSING_ENV",
            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",

            Self::DbError => "DB_ERROR",
            Self::DbPoisoned => "DB_POISONED",

            Self::ApiBadRequest => "API_BAD_REQUEST",
            Self::ApiUnauthorized => "API_UNAUTHORIZED",
            Self::ApiNotFound => "API_NOT_FOUND",
            Self::ApiInternalError => "API_INTERNAL_ERROR",

            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Taxonomy bucket
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetConnectionFailed
            | Self::NetTimeout
            | Self::NetRateLimited
            | Self::NetRpcError
            | Self::NetNoEndpoints
            | Self::NetWsDisconnected => ErrorKind::TransientNetwork,

            Self::ProviderLlmFailed
            | Self::ProviderLlmNotConfigured
            | Self::ProviderPreFilterFailed
            | Self::ProviderPriceFailed
            | Self::ProviderTelegramFailed => ErrorKind::ProviderUnavailable,

            Self::RespInvalidJson | Self::RespInvalidVerdict | Self::RespInvalidHex => {
                ErrorKind::MalformedResponse
            }

            Self::ChainSubmitFailed
            | Self::ChainReverted
            | Self::ChainReceiptTimeout
            | Self::ChainNotConfigured => ErrorKind::OnChainSubmission,

            Self::ConfigMissingEnv | Self::ConfigInvalidValue => ErrorKind::Config,
            Self::DbError | Self::DbPoisoned => ErrorKind::Storage,
            Self::ApiBadRequest
            | Self::ApiUnauthorized
            | Self::ApiNotFound
            | Self::ApiInternalError => ErrorKind::Api,
            Self::Unknown => ErrorKind::Other,
        }
    }

    /// Status the status API answers with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ApiBadRequest | Self::ConfigInvalidValue => 400,
            Self::ApiUnauthorized => 401,
            Self::ApiNotFound => 404,
            Self::NetRateLimited => 429,
            Self::ProviderLlmFailed | Self::ProviderPreFilterFailed | Self::NetNoEndpoints => 503,
            _ => 500,
        }
    }

    /// Whether a backoff retry can help
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::OnChainSubmission
        ) && !matches!(self, Self::ChainNotConfigured | Self::ChainReverted)
    }
}

// ============================================
// Shorthand constructors
// ============================================

impl AppError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetTimeout, msg)
    }

    pub fn rate_limited(service: &str) -> Self {
        Self::new(
            ErrorCode::NetRateLimited,
            format!("{} rate limited (HTTP 429)", service),
        )
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetRpcError, msg)
    }

    pub fn llm_failed(provider: &str, msg: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ProviderLlmFailed, format!("{}: {}", provider, msg))
    }

    pub fn invalid_verdict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RespInvalidVerdict, msg)
    }

    pub fn invalid_hex(value: &str) -> Self {
        Self::new(ErrorCode::RespInvalidHex, format!("not a hex quantity: {}", value))
    }

    pub fn chain_submit(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChainSubmitFailed, msg)
    }

    pub fn missing_env(key: &str) -> Self {
        Self::new(
            ErrorCode::ConfigMissingEnv,
            format!("Missing environment variable: {}", key),
        )
    }

    pub fn invalid_config(key: &str, value: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid value for {}: {}", key, value),
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiBadRequest, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiInternalError, msg)
    }
}

// ============================================
// Result type alias
// ============================================

pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Foreign error conversions
// ============================================

impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::Unknown, "I/O failure", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::NetTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::NetConnectionFailed, "Could not connect")
        } else if err.is_decode() {
            Self::with_source(ErrorCode::RespInvalidJson, "Response decode failed", err)
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            Self::new(ErrorCode::NetRateLimited, "Rate limited (HTTP 429)")
        } else {
            Self::with_source(ErrorCode::Unknown, "HTTP request failed", err)
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::RespInvalidJson, "JSON parse error", err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::with_source(ErrorCode::DbError, "SQLite error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::timeout("eth_blockNumber timed out");
        assert_eq!(err.code, ErrorCode::NetTimeout);
        assert_eq!(err.code_str(), "NET_TIMEOUT");
        assert_eq!(err.to_string(), "[NET_TIMEOUT] eth_blockNumber timed out");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCode::NetTimeout.is_retryable());
        assert!(ErrorCode::NetRateLimited.is_retryable());
        assert!(ErrorCode::ChainSubmitFailed.is_retryable());
        assert!(!ErrorCode::ChainNotConfigured.is_retryable());
        assert!(!ErrorCode::RespInvalidVerdict.is_retryable());
        assert!(!ErrorCode::ProviderLlmFailed.is_retryable());
    }

    #[test]
    fn test_taxonomy() {
        assert_eq!(ErrorCode::RespInvalidVerdict.kind(), ErrorKind::MalformedResponse);
        assert_eq!(ErrorCode::ProviderLlmFailed.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(ErrorCode::ChainReverted.kind(), ErrorKind::OnChainSubmission);
        assert_eq!(ErrorCode::DbPoisoned.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCode::ApiBadRequest.http_status(), 400);
        assert_eq!(ErrorCode::NetRateLimited.http_status(), 429);
        assert_eq!(ErrorCode::ApiNotFound.http_status(), 404);
        assert_eq!(ErrorCode::DbError.http_status(), 500);
    }
}
