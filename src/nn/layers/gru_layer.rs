use ndarray::{Axis, Ix1, Ix2};
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};
use crate::nn::params::{ParamRegistry, ParamSpec};
use crate::utils::Array2F;

/// Parameter slots of one GRU cell, in declaration order: update gate,
/// reset gate, candidate state; weights against the input (`*hx`), weights
/// against the previous hidden state (`*hh`), biases.
const WEIGHT_SLOTS: usize = 6;
const BIAS_SLOTS: usize = 3;

#[derive(Clone, Debug)]
pub struct GruConfig {
    pub dim_hidden: usize,
    pub bias_term: bool,
    /// Parameter specs in slot order `wzhx, wzhh, wrhx, wrhh, wchx, wchh`
    /// followed by `bz, br, bc` when `bias_term` is set. Each spec may share
    /// storage with a sibling timestep instance via `share_from`.
    pub params: Vec<ParamSpec>,
}

/// One timestep of a gated recurrent unit. Takes an input-feature source and
/// optionally the previous timestep's hidden-state source; the first
/// timestep starts from an all-zero hidden state. Unrolled instances share
/// their weights across time through the parameter registry while keeping
/// distinct hidden-state blobs.
pub struct GruLayer {
    config: GruConfig,
    vdim: usize,
    hdim: usize,
    cache: Option<GruCache>,
}

struct GruCache {
    update: Array2F,
    reset: Array2F,
    candidate: Array2F,
    prev_hidden: Array2F,
}

fn sigmoid(x: Array2F) -> Array2F {
    x.mapv_into(|v| 1.0 / (1.0 + (-v).exp()))
}

impl GruLayer {
    pub fn new(config: GruConfig) -> Self {
        Self { config, vdim: 0, hdim: 0, cache: None }
    }

    pub fn vdim(&self) -> usize {
        self.vdim
    }

    pub fn hdim(&self) -> usize {
        self.hdim
    }

    fn param_count(&self) -> usize {
        WEIGHT_SLOTS + if self.config.bias_term { BIAS_SLOTS } else { 0 }
    }

    fn spec(&self, slot: usize) -> &ParamSpec {
        &self.config.params[slot]
    }

    fn weight(&self, params: &ParamRegistry, slot: usize) -> crate::utils::GenericResult<Array2F> {
        Ok(params.value(&self.spec(slot).name)?.into_dimensionality::<Ix2>()?.to_owned())
    }

    fn gate_input(
        &self,
        params: &ParamRegistry,
        x: &Array2F,
        h: &Array2F,
        hx_slot: usize,
        hh_slot: usize,
        bias_slot: usize,
    ) -> crate::utils::GenericResult<Array2F> {
        let mut pre = x.dot(&self.weight(params, hx_slot)?) + h.dot(&self.weight(params, hh_slot)?);
        if self.config.bias_term {
            let bias = params.value(&self.spec(bias_slot).name)?.into_dimensionality::<Ix1>()?.to_owned();
            pre = pre + &bias;
        }
        Ok(pre)
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if data.sources.is_empty() || data.sources.len() > 2 {
            return Err(LayerError::configuration(
                name,
                format!("expected 1 or 2 sources (input, optional previous hidden), got {}", data.sources.len()),
            ));
        }
        if self.config.dim_hidden == 0 {
            return Err(LayerError::configuration(name, "dim_hidden must be positive"));
        }
        if self.config.params.len() != self.param_count() {
            return Err(LayerError::configuration(
                name,
                format!("expected {} parameter specs, got {}", self.param_count(), self.config.params.len()),
            ));
        }

        let input_shape = data.sources[0].data(Some(data.me))?.shape().to_vec();
        if input_shape.len() != 2 {
            return Err(LayerError::configuration(
                name,
                format!("expected a 2D (batch, features) input source, got shape {:?}", input_shape),
            ));
        }
        let (batch, vdim) = (input_shape[0], input_shape[1]);
        let hdim = self.config.dim_hidden;

        if let Some(prev) = data.sources.get(1) {
            let prev_shape = prev.data(Some(data.me))?.shape().to_vec();
            if prev_shape != [batch, hdim] {
                return Err(LayerError::configuration(
                    name,
                    format!(
                        "previous hidden source shape {:?} does not match expected [{}, {}]",
                        prev_shape, batch, hdim
                    ),
                ));
            }
        }

        self.vdim = vdim;
        self.hdim = hdim;

        // Slots 0..6 are weights, 6..9 biases. share_from targets resolve
        // later, in the registry's resolution pass over the whole graph.
        for slot in 0..WEIGHT_SLOTS {
            let shape = if slot % 2 == 0 { [vdim, hdim] } else { [hdim, hdim] };
            data.params.declare(name, self.spec(slot), &shape)?;
        }
        if self.config.bias_term {
            for slot in WEIGHT_SLOTS..WEIGHT_SLOTS + BIAS_SLOTS {
                data.params.declare(name, self.spec(slot), &[hdim])?;
            }
        }

        Ok(vec![batch, hdim])
    }

    pub fn forward(&mut self, _name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        let x = ctx.sources[0].data(Some(ctx.me))?.into_dimensionality::<Ix2>()?.to_owned();
        let batch = x.shape()[0];
        let h = match ctx.sources.get(1) {
            Some(prev) => prev.data(Some(ctx.me))?.into_dimensionality::<Ix2>()?.to_owned(),
            None => Array2F::zeros((batch, self.hdim)),
        };

        let update = sigmoid(self.gate_input(ctx.params, &x, &h, 0, 1, 6)?);
        let reset = sigmoid(self.gate_input(ctx.params, &x, &h, 2, 3, 7)?);
        let reset_hidden = &reset * &h;
        let candidate = self.gate_input(ctx.params, &x, &reset_hidden, 4, 5, 8)?.mapv_into(f32::tanh);

        let new_hidden = (1.0 - &update) * &h + &update * &candidate;
        out.assign(&new_hidden.into_dyn().view())?;

        self.cache = Some(GruCache { update, reset, candidate, prev_hidden: h });
        Ok(())
    }

    pub fn backward(&mut self, name: &str, _data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        let me = ctx.me;
        let cache = self.cache
            .as_ref()
            .ok_or_else(|| LayerError::compute(name, "backward called before forward"))?;
        let GruCache { update, reset, candidate, prev_hidden } = cache;

        let x = ctx.sources[0].data(Some(me))?.into_dimensionality::<Ix2>()?.to_owned();
        let dout: Array2F = grad.to_array().into_dimensionality()?;

        // h' = (1 - z) * h + z * c
        let d_update = &dout * &(candidate - prev_hidden);
        let d_candidate = &dout * update;
        let mut d_hidden = &dout * &(1.0 - update);

        // Through the candidate tanh.
        let d_candidate_pre = d_candidate * (1.0 - candidate * candidate);
        let reset_hidden = reset * prev_hidden;
        let d_reset_hidden = d_candidate_pre.dot(&self.weight(ctx.params, 5)?.t().to_owned());
        let d_reset = &d_reset_hidden * prev_hidden;
        d_hidden = d_hidden + &d_reset_hidden * reset;

        // Through the gate sigmoids.
        let d_update_pre = d_update * update * (1.0 - update);
        let d_reset_pre = d_reset * reset * (1.0 - reset);

        let mut d_input = d_candidate_pre.dot(&self.weight(ctx.params, 4)?.t().to_owned());
        d_input = d_input + d_update_pre.dot(&self.weight(ctx.params, 0)?.t().to_owned());
        d_input = d_input + d_reset_pre.dot(&self.weight(ctx.params, 2)?.t().to_owned());

        d_hidden = d_hidden + d_update_pre.dot(&self.weight(ctx.params, 1)?.t().to_owned());
        d_hidden = d_hidden + d_reset_pre.dot(&self.weight(ctx.params, 3)?.t().to_owned());

        // Shared parameters accumulate: sibling timesteps add their own
        // contributions to the same storage.
        let xt = x.t();
        let ht = prev_hidden.t();
        ctx.params.add_grad(&self.spec(0).name, &xt.dot(&d_update_pre).into_dyn())?;
        ctx.params.add_grad(&self.spec(1).name, &ht.dot(&d_update_pre).into_dyn())?;
        ctx.params.add_grad(&self.spec(2).name, &xt.dot(&d_reset_pre).into_dyn())?;
        ctx.params.add_grad(&self.spec(3).name, &ht.dot(&d_reset_pre).into_dyn())?;
        ctx.params.add_grad(&self.spec(4).name, &xt.dot(&d_candidate_pre).into_dyn())?;
        ctx.params.add_grad(&self.spec(5).name, &reset_hidden.t().dot(&d_candidate_pre).into_dyn())?;
        if self.config.bias_term {
            ctx.params.add_grad(&self.spec(6).name, &d_update_pre.sum_axis(Axis(0)).into_dyn())?;
            ctx.params.add_grad(&self.spec(7).name, &d_reset_pre.sum_axis(Axis(0)).into_dyn())?;
            ctx.params.add_grad(&self.spec(8).name, &d_candidate_pre.sum_axis(Axis(0)).into_dyn())?;
        }

        ctx.sources[0].accumulate_grad(me, &d_input.into_dyn().view())?;
        if ctx.sources.len() > 1 {
            ctx.sources[1].accumulate_grad(me, &d_hidden.into_dyn().view())?;
        }
        Ok(())
    }
}
