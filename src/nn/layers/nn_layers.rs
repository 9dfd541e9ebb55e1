use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::params::ParamRegistry;
use crate::nn::phase::Phase;
use crate::utils::GenericResult;
use super::bridge_layer::{BridgeConfig, BridgeLayer};
use super::dropout_layer::{DropoutConfig, DropoutLayer};
use super::filtering::pooling::{PoolingConfig, PoolingLayer};
use super::gru_layer::{GruConfig, GruLayer};
use super::hidden_layer::{HiddenConfig, HiddenLayer};
use super::input_layer::{InputConfig, InputLayer};
use super::slice_layer::{SliceConfig, SliceLayer};

/// Stable identity of a layer inside one graph, assigned at insertion.
/// Neighbor-keyed accessors look layers up by id, never by pointer identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub usize);

impl nohash_hasher::IsEnabled for LayerId {}

/// Enum of the layer kinds that can appear in a graph, with their configs.
#[derive(Clone)]
pub enum LayerConfig {
    /// Holds a caller-injected blob of a configured shape. Roots of the
    /// graph; the file-reading input layers of the full system parse into
    /// exactly this.
    Input(InputConfig),

    /// Fully connected transformation with a tanh nonlinearity.
    /// ### Trainable
    /// * Weight
    /// * Bias
    Hidden(HiddenConfig),

    /// Randomly nullifies a fraction of the inputs, only while training.
    Dropout(DropoutConfig),

    /// Spatial downsampling of a 4D (batch, channel, height, width) blob by
    /// a sliding max or average window. Can record the argmax per output
    /// element for exact gradient routing.
    Pooling(PoolingConfig),

    /// One timestep of a gated recurrent unit. Stacked instances share their
    /// weight parameters across time via `share_from`.
    /// ### Trainable
    /// * Update/reset/candidate gate weights and biases
    Gru(GruConfig),

    /// Connection layer: splits the single source blob along one dimension
    /// into one contiguous sub-blob per destination layer, and merges the
    /// destination gradients back additively.
    Slice(SliceConfig),

    /// Connection layer: relays a blob across a partition boundary through a
    /// blocking transport.
    Bridge(BridgeConfig),
}

/// Per-kind state, built from the config at graph insertion and populated
/// during setup.
pub enum LayerKind {
    Input(InputLayer),
    Hidden(HiddenLayer),
    Dropout(DropoutLayer),
    Pooling(PoolingLayer),
    Gru(GruLayer),
    Slice(SliceLayer),
    Bridge(BridgeLayer),
}

impl LayerKind {
    pub fn from_config(config: LayerConfig) -> Self {
        match config {
            LayerConfig::Input(c) => LayerKind::Input(InputLayer::new(c)),
            LayerConfig::Hidden(c) => LayerKind::Hidden(HiddenLayer::new(c)),
            LayerConfig::Dropout(c) => LayerKind::Dropout(DropoutLayer::new(c)),
            LayerConfig::Pooling(c) => LayerKind::Pooling(PoolingLayer::new(c)),
            LayerConfig::Gru(c) => LayerKind::Gru(GruLayer::new(c)),
            LayerConfig::Slice(c) => LayerKind::Slice(SliceLayer::new(c)),
            LayerConfig::Bridge(c) => LayerKind::Bridge(BridgeLayer::new(c)),
        }
    }
}

/// A named node of the computation graph: per-kind state plus the data and
/// gradient blobs it owns. Blobs are allocated once during setup and keep
/// their shape for the lifetime of the graph.
pub struct Layer {
    pub(crate) name: String,
    pub(crate) id: LayerId,
    pub(crate) src_ids: Vec<LayerId>,
    pub(crate) kind: LayerKind,
    pub(crate) data: Blob,
    pub(crate) grad: Blob,
}

impl Layer {
    pub(crate) fn new(name: &str, id: LayerId, src_ids: Vec<LayerId>, kind: LayerKind) -> Self {
        Self {
            name: name.to_owned(),
            id,
            src_ids,
            kind,
            data: Blob::unallocated(),
            grad: Blob::unallocated(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Read view of the feature blob, keyed by the identity of the asking
    /// neighbor. Most layers own a single blob and ignore `from`; connection
    /// layers return a neighbor-specific sub-view.
    pub fn data(&self, from: Option<LayerId>) -> GenericResult<ndarray::ArrayViewD<f32>> {
        match &self.kind {
            LayerKind::Slice(slice) => slice.data_view(&self.name, &self.data, from),
            _ => Ok(self.data.view()),
        }
    }

    pub fn grad(&self, from: Option<LayerId>) -> GenericResult<ndarray::ArrayViewD<f32>> {
        match &self.kind {
            LayerKind::Slice(slice) => slice.data_view(&self.name, &self.grad, from),
            _ => Ok(self.grad.view()),
        }
    }

    pub fn mutable_data(&mut self, from: Option<LayerId>) -> GenericResult<ndarray::ArrayViewMutD<f32>> {
        match &self.kind {
            LayerKind::Slice(slice) => slice.data_view_mut(&self.name, &mut self.data, from),
            _ => Ok(self.data.view_mut()),
        }
    }

    pub fn mutable_grad(&mut self, from: Option<LayerId>) -> GenericResult<ndarray::ArrayViewMutD<f32>> {
        match &self.kind {
            LayerKind::Slice(slice) => slice.data_view_mut(&self.name, &mut self.grad, from),
            _ => Ok(self.grad.view_mut()),
        }
    }

    /// Add a successor's gradient contribution into this layer's grad blob
    /// (or into the sub-range owned by that successor, for connection
    /// layers). Always `+=`: a layer feeding multiple successors receives
    /// the sum of their contributions.
    pub(crate) fn accumulate_grad(
        &mut self,
        from: LayerId,
        contribution: &ndarray::ArrayViewD<f32>,
    ) -> GenericResult<()> {
        let name = self.name.clone();
        let mut view = self.mutable_grad(Some(from))?;
        if view.shape() != contribution.shape() {
            return Err(LayerError::compute(
                &name,
                format!(
                    "gradient contribution shape {:?} does not match blob shape {:?}",
                    contribution.shape(),
                    view.shape()
                ),
            ));
        }
        view.zip_mut_with(contribution, |a, b| *a += b);
        Ok(())
    }
}

pub struct SetupData<'a> {
    pub me: LayerId,
    pub sources: Vec<&'a Layer>,
    pub dst_ids: &'a [LayerId],
    pub params: &'a mut ParamRegistry,
}

pub struct ForwardData<'a> {
    pub phase: Phase,
    pub me: LayerId,
    pub sources: Vec<&'a Layer>,
    pub params: &'a ParamRegistry,
}

pub struct BackwardData<'a> {
    pub phase: Phase,
    pub me: LayerId,
    pub sources: Vec<&'a mut Layer>,
    pub params: &'a mut ParamRegistry,
}

pub type EmptyLayerResult = GenericResult<()>;
pub type SetupResult = GenericResult<Vec<usize>>;

/// Call **setup** on the appropriate kind and allocate the layer's blobs
/// from the resulting shape. Not intended to be called directly.
pub fn setup_layer(layer: &mut Layer, data: SetupData) -> EmptyLayerResult {
    let name = layer.name.clone();
    use LayerKind::*;
    let shape = match &mut layer.kind {
        Input(l) => l.setup(&name, data),
        Hidden(l) => l.setup(&name, data),
        Dropout(l) => l.setup(&name, data),
        Pooling(l) => l.setup(&name, data),
        Gru(l) => l.setup(&name, data),
        Slice(l) => l.setup(&name, data),
        Bridge(l) => l.setup(&name, data),
    }?;

    layer.data = Blob::zeros(&shape)
        .map_err(|e| LayerError::configuration(&name, e.to_string()))?;
    layer.grad = Blob::zeros(&shape)
        .map_err(|e| LayerError::configuration(&name, e.to_string()))?;
    Ok(())
}

/// Call **forward** on the appropriate kind. Each call fully overwrites the
/// data blob. Not intended to be called directly.
pub fn forward_layer(layer: &mut Layer, ctx: ForwardData) -> EmptyLayerResult {
    let Layer { name, kind, data, .. } = layer;
    use LayerKind::*;
    match kind {
        Input(l) => l.forward(name, data, ctx),
        Hidden(l) => l.forward(name, data, ctx),
        Dropout(l) => l.forward(name, data, ctx),
        Pooling(l) => l.forward(name, data, ctx),
        Gru(l) => l.forward(name, data, ctx),
        Slice(l) => l.forward(name, data, ctx),
        Bridge(l) => l.forward(name, data, ctx),
    }
}

/// Call **backward** on the appropriate kind. Reads the layer's own data and
/// grad blobs and accumulates into its sources' grad blobs. Not intended to
/// be called directly.
pub fn backward_layer(layer: &mut Layer, ctx: BackwardData) -> EmptyLayerResult {
    let Layer { name, kind, data, grad, .. } = layer;
    use LayerKind::*;
    match kind {
        Input(l) => l.backward(name, data, grad, ctx),
        Hidden(l) => l.backward(name, data, grad, ctx),
        Dropout(l) => l.backward(name, data, grad, ctx),
        Pooling(l) => l.backward(name, data, grad, ctx),
        Gru(l) => l.backward(name, data, grad, ctx),
        Slice(l) => l.backward(name, data, grad, ctx),
        Bridge(l) => l.backward(name, data, grad, ctx),
    }
}
