use thiserror::Error;

/// Failures a session can end with. Recorded on the session and persisted,
/// never returned past the host controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("task failed to load: {0}")]
    LoadFailure(String),

    #[error("configuration not delivered: {0}")]
    ConfigDeliveryFailure(String),

    #[error("no completion received within {0} ms")]
    CompletionTimeout(u64),

    #[error("malformed completion: {0}")]
    MalformedCompletion(String),

    #[error("could not process completion: {0}")]
    CompletionProcessing(String),

    #[error("advanced by manual override")]
    ManualOverride,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BridgeError::LoadFailure("no ready signal within 15000 ms".into());
        assert_eq!(err.to_string(), "task failed to load: no ready signal within 15000 ms");
        assert_eq!(
            BridgeError::CompletionTimeout(600_000).to_string(),
            "no completion received within 600000 ms"
        );
    }
}
