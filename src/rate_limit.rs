//! Distributed sliding-window rate limiting over the shared Redis store.
//!
//! Every mutating request is counted per wallet, per user and globally;
//! wallet creation, which has no wallet id yet, is counted per user and
//! globally. Each check is one atomic MULTI/EXEC pipeline: evict entries
//! older than the window, count the remainder, insert the new request,
//! refresh the key TTL. Store failures admit the request (fail open).

use crate::config::RateLimitConfig;
use crate::errors::{Result, WalletEngineError};
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::warn;
use uuid::Uuid;

/// Window length in seconds; also the key TTL.
pub const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Wallet,
    User,
    Global,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Wallet => "wallet",
            Scope::User => "user",
            Scope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected { reset_at: i64 },
}

pub struct RateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        RateLimiter { redis, config }
    }

    /// Gate one mutating request on an existing wallet. Scopes are
    /// consulted wallet, then user, then global; the first rejection
    /// short-circuits.
    pub async fn check_mutation(&self, wallet_id: Uuid, user_id: &str) -> Result<()> {
        self.run_checks(&[
            (
                Scope::Wallet,
                wallet_id.to_string(),
                self.config.wallet_per_minute,
            ),
            (Scope::User, user_id.to_string(), self.config.user_per_minute),
            (
                Scope::Global,
                "all".to_string(),
                self.config.global_per_minute,
            ),
        ])
        .await
    }

    /// Gate wallet creation, which has no wallet row yet: user scope,
    /// then global.
    pub async fn check_creation(&self, user_id: &str) -> Result<()> {
        self.run_checks(&[
            (Scope::User, user_id.to_string(), self.config.user_per_minute),
            (
                Scope::Global,
                "all".to_string(),
                self.config.global_per_minute,
            ),
        ])
        .await
    }

    async fn run_checks(&self, checks: &[(Scope, String, u32)]) -> Result<()> {
        for (scope, subject, limit) in checks {
            if let Verdict::Rejected { reset_at } = self.check_scope(*scope, subject, *limit).await
            {
                warn!(
                    "Rate limit exceeded on {} scope for {}",
                    scope.as_str(),
                    subject
                );
                return Err(WalletEngineError::RateLimitExceeded {
                    scope: scope.as_str().to_string(),
                    reset_at,
                });
            }
        }

        Ok(())
    }

    async fn check_scope(&self, scope: Scope, subject: &str, limit: u32) -> Verdict {
        let now = Utc::now();
        let key = window_key(scope, subject);

        match self.window_count(&key, now.timestamp_millis()).await {
            Ok(count) => evaluate(count, limit, now.timestamp()),
            Err(e) => {
                warn!("Rate limiter store unavailable for {}: {} (failing open)", key, e);
                Verdict::Allowed
            }
        }
    }

    /// Slide the window and count atomically. Returns the pre-insert count.
    async fn window_count(&self, key: &str, now_ms: i64) -> redis::RedisResult<i64> {
        let mut conn = self.redis.clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(now_ms - WINDOW_SECS * 1000)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(WINDOW_SECS)
            .ignore();

        let (count,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }
}

pub(crate) fn window_key(scope: Scope, subject: &str) -> String {
    format!("ratelimit:{}:{}", scope.as_str(), subject)
}

fn evaluate(pre_insert_count: i64, limit: u32, now_epoch: i64) -> Verdict {
    if pre_insert_count >= i64::from(limit) {
        Verdict::Rejected {
            reset_at: now_epoch + WINDOW_SECS,
        }
    } else {
        Verdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_key_format() {
        assert_eq!(
            window_key(Scope::Wallet, "3fce9cc2-59a9-4f23-9c6b-dc42f31b43c8"),
            "ratelimit:wallet:3fce9cc2-59a9-4f23-9c6b-dc42f31b43c8"
        );
        assert_eq!(window_key(Scope::User, "alice"), "ratelimit:user:alice");
        assert_eq!(window_key(Scope::Global, "all"), "ratelimit:global:all");
    }

    #[test]
    fn test_evaluate_admits_below_limit() {
        assert_eq!(evaluate(0, 3, 1_000), Verdict::Allowed);
        assert_eq!(evaluate(2, 3, 1_000), Verdict::Allowed);
    }

    #[test]
    fn test_evaluate_rejects_at_limit() {
        // The pre-insert count hitting the limit rejects the request.
        assert_eq!(
            evaluate(3, 3, 1_000),
            Verdict::Rejected {
                reset_at: 1_000 + WINDOW_SECS
            }
        );
        assert_eq!(
            evaluate(10, 3, 1_000),
            Verdict::Rejected {
                reset_at: 1_000 + WINDOW_SECS
            }
        );
    }
}
