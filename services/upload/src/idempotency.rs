use crate::config::RedisConfig;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

/// Duplicate-submission guard backed by a Redis reservation with TTL.
///
/// The reservation is advisory: if Redis is unreachable the guard fails
/// open and the unique index on `files.idempotency_key` catches the
/// duplicate at commit time instead.
pub struct IdempotencyGuard {
    conn: Option<ConnectionManager>,
    key_prefix: String,
    ttl_secs: u64,
}

impl IdempotencyGuard {
    /// Connect to the reservation store.
    ///
    /// A failed connection is not fatal: the service starts with the guard
    /// permanently failing open rather than refusing to boot.
    pub async fn connect(config: &RedisConfig) -> Self {
        let conn = match redis::Client::open(config.url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!("Connected to idempotency reservation store");
                    Some(conn)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Reservation store unreachable; duplicate detection falls back to the database constraint"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Invalid reservation store URL; guard disabled");
                None
            }
        };

        Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.idempotency_ttl_secs,
        }
    }

    /// Atomically reserve `key`; returns `true` if this is the first
    /// reservation within the TTL window.
    ///
    /// Any store error is treated as "allowed" (fail open).
    pub async fn try_accept(&self, key: &str) -> bool {
        let Some(conn) = &self.conn else {
            return true;
        };

        let reservation = reservation_key(&self.key_prefix, key);
        let mut conn = conn.clone();
        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(&reservation)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => true,
            Ok(None) => {
                metrics::counter!("upload.idempotency.rejected").increment(1);
                false
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Reservation store unavailable; falling back to the database constraint"
                );
                metrics::counter!("upload.idempotency.fail_open").increment(1);
                true
            }
        }
    }
}

fn reservation_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_key_is_namespaced() {
        assert_eq!(reservation_key("idempotency:", "k1"), "idempotency:k1");
        assert_eq!(reservation_key("", "k1"), "k1");
    }
}
