use serde::{Deserialize, Serialize};

/// Notarization backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotarizationConfig {
    /// Which backend to use
    pub environment: NotarizationEnvironment,

    /// Endpoint receiving notarization requests (HTTP backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token sent with each request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Per-request timeout
    pub timeout_secs: u64,
}

/// Notarization backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotarizationEnvironment {
    /// In-process notarizer for development (nothing leaves the process)
    Mock,

    /// Remote notarization service reached over HTTP
    Http,
}

impl Default for NotarizationConfig {
    fn default() -> Self {
        Self {
            environment: NotarizationEnvironment::Mock,
            endpoint: None,
            api_token: None,
            timeout_secs: 30,
        }
    }
}
