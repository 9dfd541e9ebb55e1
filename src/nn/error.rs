use thiserror::Error;

/// Failures surfaced by layers and the graph driver.
///
/// `Configuration` is raised during setup and is fatal to the whole graph
/// construction. `Compute` indicates a graph-wiring bug detected at runtime
/// (e.g. an unknown neighbor identity). `Transport` wraps failures of the
/// cross-partition blob transport; retrying is the scheduler's business, the
/// core only propagates.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("layer '{layer}': configuration error: {message}")]
    Configuration { layer: String, message: String },

    #[error("layer '{layer}': compute error: {message}")]
    Compute { layer: String, message: String },

    #[error("layer '{layer}': transport error: {message}")]
    Transport { layer: String, message: String },
}

impl LayerError {
    pub fn configuration(layer: &str, message: impl Into<String>) -> anyhow::Error {
        LayerError::Configuration { layer: layer.to_owned(), message: message.into() }.into()
    }

    pub fn compute(layer: &str, message: impl Into<String>) -> anyhow::Error {
        LayerError::Compute { layer: layer.to_owned(), message: message.into() }.into()
    }

    pub fn transport(layer: &str, message: impl Into<String>) -> anyhow::Error {
        LayerError::Transport { layer: layer.to_owned(), message: message.into() }.into()
    }
}
