use ndarray::{Axis, Ix1, Ix2};
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};
use crate::nn::params::ParamSpec;
use crate::utils::Array2F;

/// Fully connected layer with a tanh nonlinearity: `y = tanh(x·W + b)`.
/// ### Trainable
/// * Weight (in_features x out_features)
/// * Bias (out_features)
#[derive(Clone, Debug)]
pub struct HiddenConfig {
    pub out_features: usize,
    pub weight: ParamSpec,
    pub bias: ParamSpec,
}

pub struct HiddenLayer {
    config: HiddenConfig,
    in_features: usize,
}

impl HiddenLayer {
    pub fn new(config: HiddenConfig) -> Self {
        Self { config, in_features: 0 }
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if data.sources.len() != 1 {
            return Err(LayerError::configuration(
                name,
                format!("expected exactly 1 source, got {}", data.sources.len()),
            ));
        }
        let src_shape = data.sources[0].data(Some(data.me))?.shape().to_vec();
        if src_shape.len() != 2 {
            return Err(LayerError::configuration(
                name,
                format!("expected a 2D (batch, features) source, got shape {:?}", src_shape),
            ));
        }
        if self.config.out_features == 0 {
            return Err(LayerError::configuration(name, "out_features must be positive"));
        }

        let (batch, in_features) = (src_shape[0], src_shape[1]);
        self.in_features = in_features;
        data.params.declare(name, &self.config.weight, &[in_features, self.config.out_features])?;
        data.params.declare(name, &self.config.bias, &[self.config.out_features])?;
        Ok(vec![batch, self.config.out_features])
    }

    pub fn forward(&mut self, _name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        let x = ctx.sources[0].data(Some(ctx.me))?.into_dimensionality::<Ix2>()?;
        let w = ctx.params.value(&self.config.weight.name)?.into_dimensionality::<Ix2>()?;
        let b = ctx.params.value(&self.config.bias.name)?.into_dimensionality::<Ix1>()?;

        let y = (x.dot(&w) + &b).mapv_into(f32::tanh);
        out.assign(&y.into_dyn().view())
    }

    pub fn backward(&mut self, _name: &str, data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        let me = ctx.me;
        let y: Array2F = data.to_array().into_dimensionality()?;
        let g: Array2F = grad.to_array().into_dimensionality()?;
        let x = ctx.sources[0].data(Some(me))?.into_dimensionality::<Ix2>()?.to_owned();
        let w = ctx.params.value(&self.config.weight.name)?.into_dimensionality::<Ix2>()?.to_owned();

        // d = grad through the tanh
        let d = g * (1.0 - &y * &y);

        let weight_grad = x.t().dot(&d);
        let bias_grad = d.sum_axis(Axis(0));
        ctx.params.add_grad(&self.config.weight.name, &weight_grad.into_dyn())?;
        ctx.params.add_grad(&self.config.bias.name, &bias_grad.into_dyn())?;

        let input_grad = d.dot(&w.t());
        ctx.sources[0].accumulate_grad(me, &input_grad.into_dyn().view())
    }
}
