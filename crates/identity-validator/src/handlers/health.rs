//! Liveness probe.

/// Handler for GET /v1/health
///
/// Checks no dependencies. Issuer key availability is reported by
/// `/v1/diagnostics/issuers` instead.
pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }
}
