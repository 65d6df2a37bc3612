pub mod auth;
pub mod rate_limit;

/// Probe endpoints are unauthenticated and exempt from admission limiting.
pub fn is_probe_path(path: &str) -> bool {
    matches!(path, "/health" | "/ready" | "/live" | "/metrics")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_are_exempt_but_verify_is_not() {
        assert!(is_probe_path("/health"));
        assert!(is_probe_path("/ready"));
        assert!(is_probe_path("/live"));
        assert!(is_probe_path("/metrics"));
        assert!(!is_probe_path("/v1/verify"));
    }
}
