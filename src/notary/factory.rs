use super::{
    HttpNotarizer, MockNotarizer, NotarizationConfig, NotarizationEnvironment, NotarizationPort,
};
use crate::error::{VaultError, VaultResult};
use std::sync::Arc;
use std::time::Duration;

/// Builds the notarizer selected by configuration
pub struct NotarizerFactory;

impl NotarizerFactory {
    /// Create a notarizer from configuration
    ///
    /// # Errors
    /// Returns `ConfigError` if the HTTP backend is selected without an endpoint
    /// or with an endpoint that is not a valid URL.
    pub fn create(config: &NotarizationConfig) -> VaultResult<Arc<dyn NotarizationPort>> {
        match config.environment {
            NotarizationEnvironment::Mock => Ok(Arc::new(MockNotarizer::new())),
            NotarizationEnvironment::Http => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    VaultError::ConfigError("No endpoint configured for HTTP notarization".to_string())
                })?;
                let notarizer = HttpNotarizer::new(
                    endpoint,
                    config.api_token.clone(),
                    Duration::from_secs(config.timeout_secs),
                )?;
                Ok(Arc::new(notarizer))
            }
        }
    }
}
