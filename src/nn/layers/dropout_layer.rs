use ndarray_rand::RandomExt;
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};
use crate::utils::{Array1F, ArrayDynF};

#[derive(Clone, Debug)]
pub struct DropoutConfig {
    pub drop: f32,
}

/// Randomly nullifies a fraction of the inputs. Only active while training;
/// in eval and deploy phases it is the identity.
pub struct DropoutLayer {
    config: DropoutConfig,
    mask: Option<ArrayDynF>,
}

impl DropoutLayer {
    pub fn new(config: DropoutConfig) -> Self {
        Self { config, mask: None }
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if data.sources.len() != 1 {
            return Err(LayerError::configuration(
                name,
                format!("expected exactly 1 source, got {}", data.sources.len()),
            ));
        }
        if !(0.0..1.0).contains(&self.config.drop) {
            return Err(LayerError::configuration(
                name,
                format!("drop rate {} must be in [0, 1)", self.config.drop),
            ));
        }
        Ok(data.sources[0].data(Some(data.me))?.shape().to_vec())
    }

    pub fn forward(&mut self, _name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        let inputs = ctx.sources[0].data(Some(ctx.me))?;

        if ctx.phase.is_training() {
            let factor = self.config.drop;
            let length = inputs.len();
            let dist = ndarray_rand::rand_distr::Uniform::new(0.0, 1.0);
            let mask = Array1F::random(length, &dist)
                .mapv_into(|o| if o < factor { 0.0 } else { 1.0 })
                .into_shape(inputs.shape())?;

            out.assign(&(&inputs * &mask).view())?;
            self.mask = Some(mask);
        } else {
            out.assign(&inputs)?;
            self.mask = None;
        }
        Ok(())
    }

    pub fn backward(&mut self, _name: &str, _data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        let me = ctx.me;
        let src_grad = match &self.mask {
            Some(mask) => &grad.to_array() * mask,
            None => grad.to_array(),
        };
        ctx.sources[0].accumulate_grad(me, &src_grad.view())
    }
}
