use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WalletEngineError>;

#[derive(Error, Debug)]
pub enum WalletEngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Caller identity missing or invalid")]
    Unauthorized,

    #[error("Caller does not own wallet {0}")]
    Forbidden(Uuid),

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Wallet already exists for user {user} and currency {currency}")]
    Conflict { user: String, currency: String },

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: String,
        available: String,
    },

    #[error("Currency mismatch: {source_currency} -> {destination}")]
    CurrencyMismatch {
        source_currency: String,
        destination: String,
    },

    #[error("Amount {amount} exceeds per-transaction limit {limit}")]
    AmountExceedsLimit { amount: String, limit: String },

    #[error("Resulting balance {new_balance} exceeds wallet limit {limit}")]
    BalanceExceedsLimit { new_balance: String, limit: String },

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Wallet {wallet_id} is {status}")]
    InvalidState { wallet_id: Uuid, status: String },

    #[error("Rate limit exceeded on {scope} scope")]
    RateLimitExceeded { scope: String, reset_at: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Event log error: {0}")]
    Nats(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WalletEngineError {
    fn from(err: serde_json::Error) -> Self {
        WalletEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// True when `err` wraps a unique-index violation on the named constraint.
pub(crate) fn is_unique_violation(err: &WalletEngineError, constraint: &str) -> bool {
    if let WalletEngineError::Database(sqlx::Error::Database(db)) = err {
        matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
            && db.constraint() == Some(constraint)
    } else {
        false
    }
}

impl WalletEngineError {
    pub fn error_type(&self) -> &str {
        match self {
            WalletEngineError::Validation(_) => "validation",
            WalletEngineError::Unauthorized => "unauthorized",
            WalletEngineError::Forbidden(_) => "forbidden",
            WalletEngineError::WalletNotFound(_) => "not_found",
            WalletEngineError::Conflict { .. } => "conflict",
            WalletEngineError::InsufficientFunds { .. } => "insufficient_funds",
            WalletEngineError::CurrencyMismatch { .. } => "currency_mismatch",
            WalletEngineError::AmountExceedsLimit { .. } => "amount_exceeds_limit",
            WalletEngineError::BalanceExceedsLimit { .. } => "balance_exceeds_limit",
            WalletEngineError::InvalidTransfer(_) => "invalid_transfer",
            WalletEngineError::InvalidState { .. } => "invalid_state",
            WalletEngineError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            WalletEngineError::Database(_) => "internal",
            WalletEngineError::Redis(_) => "internal",
            WalletEngineError::Nats(_) => "internal",
            WalletEngineError::Internal(_) => "internal",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            WalletEngineError::InsufficientFunds {
                requested,
                available,
            } => Some(json!({ "requested": requested, "available": available })),
            WalletEngineError::AmountExceedsLimit { amount, limit } => {
                Some(json!({ "amount": amount, "limit": limit }))
            }
            WalletEngineError::BalanceExceedsLimit { new_balance, limit } => {
                Some(json!({ "new_balance": new_balance, "limit": limit }))
            }
            WalletEngineError::RateLimitExceeded { scope, reset_at } => {
                Some(json!({ "scope": scope, "remaining": 0, "reset_at": reset_at }))
            }
            WalletEngineError::Conflict { user, currency } => {
                Some(json!({ "user": user, "currency": currency }))
            }
            _ => None,
        }
    }

    /// Message safe to return to callers. Store errors are never leaked.
    fn public_message(&self) -> String {
        match self {
            WalletEngineError::Database(_)
            | WalletEngineError::Redis(_)
            | WalletEngineError::Nats(_)
            | WalletEngineError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for WalletEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let mut body = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.public_message(),
                "type": self.error_type()
            }
        });

        if let Some(details) = self.details() {
            body["error"]["details"] = details;
        }

        HttpResponse::build(status_code).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            WalletEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            WalletEngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            WalletEngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            WalletEngineError::WalletNotFound(_) => StatusCode::NOT_FOUND,
            WalletEngineError::Conflict { .. } => StatusCode::CONFLICT,
            WalletEngineError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            WalletEngineError::CurrencyMismatch { .. } => StatusCode::BAD_REQUEST,
            WalletEngineError::AmountExceedsLimit { .. } => StatusCode::BAD_REQUEST,
            WalletEngineError::BalanceExceedsLimit { .. } => StatusCode::BAD_REQUEST,
            WalletEngineError::InvalidTransfer(_) => StatusCode::BAD_REQUEST,
            WalletEngineError::InvalidState { .. } => StatusCode::CONFLICT,
            WalletEngineError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            WalletEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WalletEngineError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WalletEngineError::Nats(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WalletEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            WalletEngineError::Validation("bad amount".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WalletEngineError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WalletEngineError::Forbidden(Uuid::new_v4()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WalletEngineError::WalletNotFound(Uuid::new_v4()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WalletEngineError::RateLimitExceeded {
                scope: "wallet".into(),
                reset_at: 0
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            WalletEngineError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_errors_render_as_internal() {
        let err = WalletEngineError::Nats("connection refused to nats://secret-host".into());
        assert_eq!(err.error_type(), "internal");
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_rate_limit_details_carry_reset() {
        let err = WalletEngineError::RateLimitExceeded {
            scope: "wallet".into(),
            reset_at: 1_700_000_060,
        };
        let details = err.details().unwrap();
        assert_eq!(details["remaining"], 0);
        assert_eq!(details["reset_at"], 1_700_000_060);
    }

    #[test]
    fn test_insufficient_funds_details() {
        let err = WalletEngineError::InsufficientFunds {
            requested: "200.00".into(),
            available: "125.00".into(),
        };
        assert_eq!(err.error_type(), "insufficient_funds");
        let details = err.details().unwrap();
        assert_eq!(details["requested"], "200.00");
        assert_eq!(details["available"], "125.00");
    }
}
