//! Queue endpoint addressing.

/// Base URL of one queue endpoint plus an optional bearer credential.
///
/// The four operation URLs all hang off the same base, e.g.
/// `https://api.example.com/v2/<endpoint-id>/run`.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: String,
    api_key: Option<String>,
}

impl Endpoint {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            api_key: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Read `SPOOL_ENDPOINT` (and `SPOOL_API_KEY` when set) from the
    /// environment. `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let base = std::env::var("SPOOL_ENDPOINT").ok()?;
        let mut endpoint = Self::new(base);
        if let Ok(key) = std::env::var("SPOOL_API_KEY") {
            endpoint = endpoint.with_api_key(key);
        }
        Some(endpoint)
    }

    pub fn run_url(&self) -> String {
        format!("{}/run", self.base)
    }

    pub fn stream_url(&self, job_id: &str) -> String {
        format!("{}/stream/{}", self.base, job_id)
    }

    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}/status/{}", self.base, job_id)
    }

    pub fn cancel_url(&self, job_id: &str) -> String {
        format!("{}/cancel/{}", self.base, job_id)
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_derive_from_base() {
        let endpoint = Endpoint::new("http://localhost:8000");
        assert_eq!(endpoint.run_url(), "http://localhost:8000/run");
        assert_eq!(
            endpoint.stream_url("j-1"),
            "http://localhost:8000/stream/j-1"
        );
        assert_eq!(
            endpoint.status_url("j-1"),
            "http://localhost:8000/status/j-1"
        );
        assert_eq!(
            endpoint.cancel_url("j-1"),
            "http://localhost:8000/cancel/j-1"
        );
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let endpoint = Endpoint::new("http://localhost:8000//");
        assert_eq!(endpoint.run_url(), "http://localhost:8000/run");
    }
}
