use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};

/// Root layer holding a caller-injected blob. The full system's input layers
/// read records from storage backends; here the parsed buffer is injected
/// through `Graph::set_input` before each pass.
#[derive(Clone, Debug)]
pub struct InputConfig {
    pub shape: Vec<usize>,
}

pub struct InputLayer {
    config: InputConfig,
}

impl InputLayer {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if !data.sources.is_empty() {
            return Err(LayerError::configuration(name, "input layers take no sources"));
        }
        if self.config.shape.is_empty() || self.config.shape.contains(&0) {
            return Err(LayerError::configuration(
                name,
                format!("invalid input shape {:?}", self.config.shape),
            ));
        }
        Ok(self.config.shape.clone())
    }

    // Data was injected before the pass; nothing to compute.
    pub fn forward(&mut self, _name: &str, _out: &mut Blob, _ctx: ForwardData) -> EmptyLayerResult {
        Ok(())
    }

    // The grad blob collects successor contributions; nothing propagates
    // further back.
    pub fn backward(&mut self, _name: &str, _data: &Blob, _grad: &Blob, _ctx: BackwardData) -> EmptyLayerResult {
        Ok(())
    }
}
