//! Error types for the feature broker and the component graph

use thiserror::Error;

/// Errors raised while wiring or recomputing components.
#[derive(Error, Debug)]
pub enum BeansError {
    #[error("Duplicate feature: {feature:?}")]
    DuplicateFeature { feature: String },

    #[error("Unknown feature named {feature:?}")]
    UnknownFeature { feature: String },

    #[error("The value {value} of {feature:?} does not match the specified criteria: {criteria}")]
    CapabilityViolation {
        feature: String,
        value: String,
        criteria: String,
    },

    #[error("Feature broker dropped before {feature:?} was resolved")]
    BrokerDropped { feature: String },

    #[error("Observer graph has a cycle through component '{component}'")]
    CyclicObservers { component: String },

    #[error("Wiring has a cycle involving feature '{feature}'")]
    CyclicWiring { feature: String },

    #[error("Recomputation failed in component '{component}': {message}")]
    Recomputation { component: String, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BeansError {
    /// Shorthand for a failed `recompute` hook.
    pub fn recomputation(component: impl Into<String>, message: impl ToString) -> Self {
        BeansError::Recomputation {
            component: component.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for an invalid configuration or parameter.
    pub fn invalid(message: impl Into<String>) -> Self {
        BeansError::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn is_unknown_feature(&self) -> bool {
        matches!(self, BeansError::UnknownFeature { .. })
    }

    pub fn is_capability_violation(&self) -> bool {
        matches!(self, BeansError::CapabilityViolation { .. })
    }
}

/// Result type for broker and component operations
pub type BeansResult<T> = Result<T, BeansError>;
