use std::sync::Arc;
use log::trace;
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};
use crate::nn::transport::BlobTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeRole {
    /// Lives in the producing partition: relays its source's blob out and
    /// receives the gradient coming back.
    Send,
    /// Lives in the consuming partition: has no in-graph source, blocks
    /// until the remote blob arrives and ships the gradient back.
    Recv,
}

#[derive(Clone)]
pub struct BridgeConfig {
    pub role: BridgeRole,
    /// Logical channel connecting the two halves of the bridge.
    pub channel: String,
    /// Required for `Recv`: the remote shape cannot be inferred locally.
    pub shape: Option<Vec<usize>>,
    pub transport: Arc<dyn BlobTransport>,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("role", &self.role)
            .field("channel", &self.channel)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Connection layer relaying a blob across a partition boundary. The only
/// point where a pass may block: `recv` suspends until the remote side has
/// materialized the blob. Transport failures are surfaced as pass failures,
/// never retried here.
pub struct BridgeLayer {
    config: BridgeConfig,
}

impl BridgeLayer {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn grad_channel(&self) -> String {
        format!("{}:grad", self.config.channel)
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        match self.config.role {
            BridgeRole::Send => {
                if data.sources.len() != 1 {
                    return Err(LayerError::configuration(
                        name,
                        format!("send bridge expects exactly 1 source, got {}", data.sources.len()),
                    ));
                }
                Ok(data.sources[0].data(Some(data.me))?.shape().to_vec())
            }
            BridgeRole::Recv => {
                if !data.sources.is_empty() {
                    return Err(LayerError::configuration(name, "recv bridge takes no sources"));
                }
                match &self.config.shape {
                    Some(shape) if !shape.is_empty() && !shape.contains(&0) => Ok(shape.clone()),
                    _ => Err(LayerError::configuration(
                        name,
                        "recv bridge requires a configured remote shape",
                    )),
                }
            }
        }
    }

    pub fn forward(&mut self, name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        match self.config.role {
            BridgeRole::Send => {
                let inputs = ctx.sources[0].data(Some(ctx.me))?;
                out.assign(&inputs)?;
                trace!("bridge '{}' sending feature blob", name);
                self.config.transport
                    .send(&self.config.channel, &out.to_array())
                    .map_err(|e| LayerError::transport(name, e.to_string()))
            }
            BridgeRole::Recv => {
                trace!("bridge '{}' waiting for feature blob", name);
                let blob = self.config.transport
                    .recv(&self.config.channel)
                    .map_err(|e| LayerError::transport(name, e.to_string()))?;
                out.assign(&blob.view())
                    .map_err(|e| LayerError::transport(name, e.to_string()))
            }
        }
    }

    pub fn backward(&mut self, name: &str, _data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        match self.config.role {
            BridgeRole::Send => {
                trace!("bridge '{}' waiting for gradient blob", name);
                let remote_grad = self.config.transport
                    .recv(&self.grad_channel())
                    .map_err(|e| LayerError::transport(name, e.to_string()))?;
                let me = ctx.me;
                ctx.sources[0].accumulate_grad(me, &remote_grad.view())
            }
            BridgeRole::Recv => {
                trace!("bridge '{}' sending gradient blob", name);
                self.config.transport
                    .send(&self.grad_channel(), &grad.to_array())
                    .map_err(|e| LayerError::transport(name, e.to_string()))
            }
        }
    }
}
