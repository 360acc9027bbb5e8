//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Operations retained per document. Clients whose base version is
    /// older than the retained window must resync.
    pub history_limit: usize,
    /// Maximum number of operations in one fetch response.
    pub max_fetch_batch: u32,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            history_limit: 10_000,
            max_fetch_batch: 500,
        }
    }

    /// Sets the retained history per document.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Sets the maximum fetch batch size.
    pub fn with_max_fetch_batch(mut self, size: u32) -> Self {
        self.max_fetch_batch = size.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
