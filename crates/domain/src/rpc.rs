use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::DomainResult;
use crate::error::DomainError;

/// Bounded deadlines for calls to sibling services. Advisory calls run on
/// the shorter deadline; a safe default stands in for a slow answer.
#[derive(Clone, Copy, Debug)]
pub struct RpcTimeouts {
    pub advisory: Duration,
    pub mandatory: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            advisory: Duration::from_secs(5),
            mandatory: Duration::from_secs(10),
        }
    }
}

impl RpcTimeouts {
    pub fn from_millis(advisory_ms: u64, mandatory_ms: u64) -> Self {
        Self {
            advisory: Duration::from_millis(advisory_ms.max(1)),
            mandatory: Duration::from_millis(mandatory_ms.max(1)),
        }
    }
}

/// Remote call whose failure degrades to `default`: errors and timeouts are
/// logged, never propagated.
pub async fn advisory<T, F>(call: &str, limit: Duration, default: T, fut: F) -> T
where
    F: Future<Output = DomainResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(call, error = %err, "advisory call failed, using default");
            default
        }
        Err(_) => {
            warn!(
                call,
                timeout_ms = limit.as_millis() as u64,
                "advisory call timed out, using default"
            );
            default
        }
    }
}

/// Remote call whose failure aborts the operation; a timeout surfaces as an
/// upstream error.
pub async fn mandatory<T, F>(call: &str, limit: Duration, fut: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::Upstream(format!(
            "{call} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advisory_swallows_errors_into_default() {
        let value = advisory("test.call", Duration::from_millis(50), 7usize, async {
            Err(DomainError::Upstream("boom".to_string()))
        })
        .await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn advisory_times_out_into_default() {
        let value = advisory("test.call", Duration::from_millis(10), 7usize, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn mandatory_propagates_errors() {
        let result: DomainResult<usize> =
            mandatory("test.call", Duration::from_millis(50), async {
                Err(DomainError::Precondition("nope".to_string()))
            })
            .await;
        assert!(matches!(result, Err(DomainError::Precondition(_))));
    }

    #[tokio::test]
    async fn mandatory_times_out_into_upstream_error() {
        let result: DomainResult<usize> =
            mandatory("test.call", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(DomainError::Upstream(_))));
    }
}
