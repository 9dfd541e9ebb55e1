use std::collections::HashMap;
use log::debug;
use nohash_hasher::IntMap;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{
    backward_layer, forward_layer, setup_layer, BackwardData, ForwardData, Layer, LayerConfig,
    LayerId, LayerKind, SetupData,
};
use crate::nn::params::ParamRegistry;
use crate::nn::phase::Phase;
use crate::utils::{ArrayDynF, GenericResult};

/// Single-partition graph driver. Layers are added in dependency order (a
/// layer's sources must already exist), which makes the insertion order a
/// topological order: forward walks it, backward walks the exact reverse.
/// A layer's inputs are therefore computed before it runs, and its gradient
/// is fully accumulated from all successors before it propagates further
/// back.
pub struct Graph {
    layers: Vec<Layer>,
    names: HashMap<String, LayerId>,
    dst_ids: Vec<Vec<LayerId>>,
    params: ParamRegistry,
    pending_grads: IntMap<LayerId, ArrayDynF>,
    ready: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            names: HashMap::new(),
            dst_ids: Vec::new(),
            params: ParamRegistry::new(),
            pending_grads: IntMap::default(),
            ready: false,
        }
    }

    /// Declare a layer. `sources` name already-added layers; connection
    /// layers later use the order in which their destinations were added as
    /// the stable neighbor numbering.
    pub fn add(&mut self, name: &str, config: LayerConfig, sources: &[&str]) -> GenericResult<LayerId> {
        if self.ready {
            return Err(LayerError::configuration(name, "cannot add layers after setup"));
        }
        if self.names.contains_key(name) {
            return Err(LayerError::configuration(name, "duplicate layer name"));
        }

        let mut src_ids = Vec::with_capacity(sources.len());
        for src in sources {
            let id = *self.names.get(*src).ok_or_else(|| {
                LayerError::configuration(name, format!("unknown source layer '{}'", src))
            })?;
            if src_ids.contains(&id) {
                return Err(LayerError::configuration(name, format!("duplicate source layer '{}'", src)));
            }
            src_ids.push(id);
        }

        let id = LayerId(self.layers.len());
        for src in &src_ids {
            self.dst_ids[src.0].push(id);
        }
        self.layers.push(Layer::new(name, id, src_ids, LayerKind::from_config(config)));
        self.dst_ids.push(Vec::new());
        self.names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Run setup over every layer in dependency order, then resolve
    /// parameter sharing. Any failure is fatal to the whole graph
    /// construction: the graph stays unusable, no layer is half-initialized
    /// from the caller's point of view.
    pub fn setup(&mut self) -> GenericResult<()> {
        for i in 0..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(i);
            let layer = &mut tail[0];
            debug!("setting up layer '{}'", layer.name);
            let me = layer.id;
            let sources = gather_sources(head, &layer.src_ids)?;
            setup_layer(layer, SetupData {
                me,
                sources,
                dst_ids: &self.dst_ids[i],
                params: &mut self.params,
            })?;
        }
        self.params.resolve()?;
        self.ready = true;
        Ok(())
    }

    /// One full forward pass in topological order. Each layer's data blob is
    /// fully overwritten, so repeated passes never see stale values.
    pub fn forward(&mut self, phase: Phase) -> GenericResult<()> {
        self.check_ready()?;
        debug!("forward pass ({:?})", phase);
        for i in 0..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(i);
            let layer = &mut tail[0];
            let me = layer.id;
            let sources = gather_sources(head, &layer.src_ids)?;
            forward_layer(layer, ForwardData {
                phase,
                me,
                sources,
                params: &self.params,
            })?;
        }
        Ok(())
    }

    /// One full backward pass in reverse topological order. All gradient
    /// blobs and parameter gradients are zeroed first (the driver side of
    /// the accumulation contract), then injected loss gradients are applied,
    /// then every layer adds its contributions to its sources.
    pub fn backward(&mut self, phase: Phase) -> GenericResult<()> {
        self.check_ready()?;
        debug!("backward pass ({:?})", phase);
        for layer in &mut self.layers {
            layer.grad.zero();
        }
        self.params.zero_grads();

        for (id, seed) in std::mem::take(&mut self.pending_grads) {
            self.layers[id.0].grad.assign(&seed.view())?;
        }

        for i in (0..self.layers.len()).rev() {
            let (head, tail) = self.layers.split_at_mut(i);
            let layer = &mut tail[0];
            let me = layer.id;
            let sources = gather_sources_mut(head, &layer.src_ids)?;
            backward_layer(layer, BackwardData {
                phase,
                me,
                sources,
                params: &mut self.params,
            })?;
        }
        Ok(())
    }

    /// Inject the next pass's input for an input layer.
    pub fn set_input(&mut self, name: &str, values: &ArrayDynF) -> GenericResult<()> {
        self.check_ready()?;
        let id = self.id_of(name)?;
        let layer = &mut self.layers[id.0];
        if !matches!(layer.kind, LayerKind::Input(_)) {
            return Err(LayerError::compute(name, "set_input targets an input layer"));
        }
        if layer.data.shape() != values.shape() {
            return Err(LayerError::compute(
                name,
                format!(
                    "input shape {:?} does not match configured shape {:?}",
                    values.shape(),
                    layer.data.shape()
                ),
            ));
        }
        layer.data.assign(&values.view())
    }

    /// Seed a layer's gradient for the next backward pass, e.g. with the
    /// loss gradient of an output layer. Applied after the driver zeroes all
    /// gradient blobs.
    pub fn set_grad(&mut self, name: &str, values: &ArrayDynF) -> GenericResult<()> {
        self.check_ready()?;
        let id = self.id_of(name)?;
        let layer = &self.layers[id.0];
        if layer.grad.shape() != values.shape() {
            return Err(LayerError::compute(
                name,
                format!(
                    "gradient shape {:?} does not match blob shape {:?}",
                    values.shape(),
                    layer.grad.shape()
                ),
            ));
        }
        self.pending_grads.insert(id, values.clone());
        Ok(())
    }

    pub fn output(&self, name: &str) -> GenericResult<ArrayDynF> {
        Ok(self.layer(name)?.data(None)?.to_owned())
    }

    pub fn grad_of(&self, name: &str) -> GenericResult<ArrayDynF> {
        Ok(self.layer(name)?.grad(None)?.to_owned())
    }

    pub fn layer(&self, name: &str) -> GenericResult<&Layer> {
        Ok(&self.layers[self.id_of(name)?.0])
    }

    pub fn params(&self) -> &ParamRegistry {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamRegistry {
        &mut self.params
    }

    fn id_of(&self, name: &str) -> GenericResult<LayerId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown layer '{}'", name))
    }

    fn check_ready(&self) -> GenericResult<()> {
        if !self.ready {
            return Err(anyhow::anyhow!("graph has not been set up"));
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn gather_sources<'a>(head: &'a [Layer], src_ids: &[LayerId]) -> GenericResult<Vec<&'a Layer>> {
    src_ids.iter().map(|id| {
        head.get(id.0).ok_or_else(|| anyhow::anyhow!("source layer id {:?} out of order", id))
    }).collect()
}

fn gather_sources_mut<'a>(head: &'a mut [Layer], src_ids: &[LayerId]) -> GenericResult<Vec<&'a mut Layer>> {
    let mut by_id: IntMap<LayerId, &'a mut Layer> =
        head.iter_mut().map(|layer| (layer.id, layer)).collect();
    src_ids.iter().map(|id| {
        by_id.remove(id).ok_or_else(|| anyhow::anyhow!("source layer id {:?} out of order", id))
    }).collect()
}
