use ndarray::Ix4;
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::filtering::PoolGeometry;
use crate::nn::layers::nn_layers::{BackwardData, EmptyLayerResult, ForwardData, SetupData, SetupResult};
use crate::utils::Array4F;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolMethod {
    Max,
    Avg,
}

#[derive(Clone, Debug)]
pub struct PoolingConfig {
    pub kernel: usize,
    pub pad: usize,
    pub stride: usize,
    pub method: PoolMethod,
    /// Record the argmax of every window during forward so backward can
    /// route gradients without rescanning (Caffe-style bookkeeping). Max
    /// pooling only.
    pub record_mask: bool,
}

/// Spatial downsampling of a 4D (batch, channel, height, width) blob by a
/// sliding max or average window. Boundary windows that extend into the
/// padding only use in-bounds elements, for the average denominator too.
pub struct PoolingLayer {
    config: PoolingConfig,
    geometry: Option<PoolGeometry>,
    /// Flat in-plane argmax index per output element, when recording.
    mask: Option<Array4F>,
}

impl PoolingLayer {
    pub fn new(config: PoolingConfig) -> Self {
        Self { config, geometry: None, mask: None }
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if data.sources.len() != 1 {
            return Err(LayerError::configuration(
                name,
                format!("expected exactly 1 source, got {}", data.sources.len()),
            ));
        }
        if self.config.record_mask && self.config.method != PoolMethod::Max {
            return Err(LayerError::configuration(name, "mask recording requires max pooling"));
        }

        let src_shape = data.sources[0].data(Some(data.me))?.shape().to_vec();
        let geometry = PoolGeometry::from_shape(&src_shape, self.config.kernel, self.config.pad, self.config.stride)
            .map_err(|e| LayerError::configuration(name, e.to_string()))?;
        let pooled_shape = geometry.pooled_shape();
        self.geometry = Some(geometry);
        Ok(pooled_shape)
    }

    pub fn forward(&mut self, name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        let geo = self.geometry
            .ok_or_else(|| LayerError::compute(name, "forward called before setup"))?;
        let inputs = ctx.sources[0].data(Some(ctx.me))?.into_dimensionality::<Ix4>()?;

        let mut result = Array4F::zeros((geo.batch, geo.channels, geo.pooled_height, geo.pooled_width));
        let mut mask = self.config.record_mask
            .then(|| Array4F::zeros(result.raw_dim()));

        for b in 0..geo.batch {
            for c in 0..geo.channels {
                for ph in 0..geo.pooled_height {
                    for pw in 0..geo.pooled_width {
                        let (hs, ws) = geo.window(ph, pw);
                        match self.config.method {
                            PoolMethod::Max => {
                                // First maximal element in scan order wins.
                                let mut best = f32::NEG_INFINITY;
                                let mut best_idx = 0;
                                for h in hs.clone() {
                                    for w in ws.clone() {
                                        let v = inputs[(b, c, h, w)];
                                        if v > best {
                                            best = v;
                                            best_idx = h * geo.width + w;
                                        }
                                    }
                                }
                                result[(b, c, ph, pw)] = best;
                                if let Some(mask) = mask.as_mut() {
                                    mask[(b, c, ph, pw)] = best_idx as f32;
                                }
                            }
                            PoolMethod::Avg => {
                                let denominator = (hs.len() * ws.len()) as f32;
                                let mut sum = 0.0;
                                for h in hs.clone() {
                                    for w in ws.clone() {
                                        sum += inputs[(b, c, h, w)];
                                    }
                                }
                                result[(b, c, ph, pw)] = sum / denominator;
                            }
                        }
                    }
                }
            }
        }

        self.mask = mask;
        out.assign(&result.into_dyn().view())
    }

    pub fn backward(&mut self, name: &str, _data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        let geo = self.geometry
            .ok_or_else(|| LayerError::compute(name, "backward called before setup"))?;
        let me = ctx.me;
        let inputs = ctx.sources[0].data(Some(me))?.into_dimensionality::<Ix4>()?.to_owned();
        let grad: Array4F = grad.to_array().into_dimensionality()?;

        let mut result = Array4F::zeros((geo.batch, geo.channels, geo.height, geo.width));

        for b in 0..geo.batch {
            for c in 0..geo.channels {
                for ph in 0..geo.pooled_height {
                    for pw in 0..geo.pooled_width {
                        let (hs, ws) = geo.window(ph, pw);
                        let g = grad[(b, c, ph, pw)];
                        match self.config.method {
                            PoolMethod::Max => {
                                // Route the whole gradient to the argmax;
                                // overlapping windows accumulate additively.
                                let idx = match &self.mask {
                                    Some(mask) => mask[(b, c, ph, pw)] as usize,
                                    None => {
                                        let mut best = f32::NEG_INFINITY;
                                        let mut best_idx = 0;
                                        for h in hs.clone() {
                                            for w in ws.clone() {
                                                let v = inputs[(b, c, h, w)];
                                                if v > best {
                                                    best = v;
                                                    best_idx = h * geo.width + w;
                                                }
                                            }
                                        }
                                        best_idx
                                    }
                                };
                                result[(b, c, idx / geo.width, idx % geo.width)] += g;
                            }
                            PoolMethod::Avg => {
                                // Same denominator as forward.
                                let share = g / (hs.len() * ws.len()) as f32;
                                for h in hs.clone() {
                                    for w in ws.clone() {
                                        result[(b, c, h, w)] += share;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        ctx.sources[0].accumulate_grad(me, &result.into_dyn().view())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, stack, Axis};
    use crate::nn::graph::Graph;
    use crate::nn::layers::input_layer::InputConfig;
    use crate::nn::layers::nn_layers::LayerConfig;
    use crate::nn::phase::Phase;
    use crate::utils::{arrays_almost_equal, Array3F, ArrayDynF};
    use super::*;

    fn create_inputs() -> ArrayDynF {
        let arr: Array3F = array![
            [
                [1.0, 2.0, 3.0, 4.0],
                [5.0, 6.0, 7.0, 8.0],
                [9.0, 10.0, 11.0, 12.0],
                [-8.0, 0.0, 0.0, 4.0]
            ],
            [
                [-1.0, 3.0, -5.0, 1.0],
                [2.0, 4.0, -99.0, 32.0],
                [16.0, 69.0, -69.0, 1.0],
                [-8.0, 0.0, 0.0, 4.0]
            ]
        ];
        stack![Axis(0), arr].into_dyn()
    }

    fn create_max_outputs() -> ArrayDynF {
        let result: Array3F = array![
            [
                [6., 8.],
                [10., 12.]
            ],
            [
                [4., 32.],
                [69., 4.]
            ]
        ];
        stack![Axis(0), result].into_dyn()
    }

    fn pooling_graph(config: PoolingConfig) -> Graph {
        let mut graph = Graph::new();
        graph.add("in", LayerConfig::Input(InputConfig { shape: vec![1, 2, 4, 4] }), &[]).unwrap();
        graph.add("pool", LayerConfig::Pooling(config), &["in"]).unwrap();
        graph.setup().unwrap();
        graph
    }

    #[test]
    fn test_max_forward_2x2() {
        let mut graph = pooling_graph(PoolingConfig {
            kernel: 2,
            pad: 0,
            stride: 2,
            method: PoolMethod::Max,
            record_mask: false,
        });
        graph.set_input("in", &create_inputs()).unwrap();
        graph.forward(Phase::Train).unwrap();
        assert_eq!(graph.output("pool").unwrap(), create_max_outputs());
    }

    #[test]
    fn test_max_backward_routes_to_argmax() {
        // Window [1, 5, 3, 2]: the whole gradient flows to the 5.
        let inputs = stack![Axis(0), array![[[1.0, 5.0], [3.0, 2.0]]]].into_dyn();
        let mut graph = Graph::new();
        graph.add("in", LayerConfig::Input(InputConfig { shape: vec![1, 1, 2, 2] }), &[]).unwrap();
        graph.add("pool", LayerConfig::Pooling(PoolingConfig {
            kernel: 2,
            pad: 0,
            stride: 2,
            method: PoolMethod::Max,
            record_mask: false,
        }), &["in"]).unwrap();
        graph.setup().unwrap();

        graph.set_input("in", &inputs).unwrap();
        graph.forward(Phase::Train).unwrap();
        graph.set_grad("pool", &stack![Axis(0), array![[[3.0]]]].into_dyn()).unwrap();
        graph.backward(Phase::Train).unwrap();

        let expected = stack![Axis(0), array![[[0.0, 3.0], [0.0, 0.0]]]].into_dyn();
        assert_eq!(graph.grad_of("in").unwrap(), expected);
    }

    #[test]
    fn test_max_backward_2x2() {
        let mut graph = pooling_graph(PoolingConfig {
            kernel: 2,
            pad: 0,
            stride: 2,
            method: PoolMethod::Max,
            record_mask: false,
        });
        graph.set_input("in", &create_inputs()).unwrap();
        graph.forward(Phase::Train).unwrap();
        graph.set_grad("pool", &(create_max_outputs() * -0.7)).unwrap();
        graph.backward(Phase::Train).unwrap();

        let expected: Array3F = array![
            [[0., 0., 0., 0.],
             [0., -4.2, 0., -5.6],
             [0., -7., 0., -8.4],
             [0., 0., 0., 0.]],
            [[0., 0., 0., 0.],
             [0., -2.8, 0., -22.4],
             [0., -48.3, 0., 0.],
             [0., 0., 0., -2.8]]
        ];
        let expected = stack![Axis(0), expected].into_dyn();
        assert!(arrays_almost_equal(&expected, &graph.grad_of("in").unwrap()));
    }

    #[test]
    fn test_mask_variant_matches_rescan_variant() {
        let run = |record_mask: bool| {
            let mut graph = pooling_graph(PoolingConfig {
                kernel: 2,
                pad: 0,
                stride: 2,
                method: PoolMethod::Max,
                record_mask,
            });
            graph.set_input("in", &create_inputs()).unwrap();
            graph.forward(Phase::Train).unwrap();
            graph.set_grad("pool", &(create_max_outputs() * 0.5)).unwrap();
            graph.backward(Phase::Train).unwrap();
            (graph.output("pool").unwrap(), graph.grad_of("in").unwrap())
        };

        let (plain_out, plain_grad) = run(false);
        let (masked_out, masked_grad) = run(true);
        assert_eq!(plain_out, masked_out);
        assert_eq!(plain_grad, masked_grad);
    }

    #[test]
    fn test_avg_forward_and_backward() {
        let inputs = stack![Axis(0), array![[[1.0, 5.0], [3.0, 2.0]]]].into_dyn();
        let mut graph = Graph::new();
        graph.add("in", LayerConfig::Input(InputConfig { shape: vec![1, 1, 2, 2] }), &[]).unwrap();
        graph.add("pool", LayerConfig::Pooling(PoolingConfig {
            kernel: 2,
            pad: 0,
            stride: 2,
            method: PoolMethod::Avg,
            record_mask: false,
        }), &["in"]).unwrap();
        graph.setup().unwrap();

        graph.set_input("in", &inputs).unwrap();
        graph.forward(Phase::Train).unwrap();
        let expected = stack![Axis(0), array![[[2.75]]]].into_dyn();
        assert!(arrays_almost_equal(&expected, &graph.output("pool").unwrap()));

        // Each of the 4 in-bounds elements receives exactly 1/4.
        graph.set_grad("pool", &stack![Axis(0), array![[[2.0]]]].into_dyn()).unwrap();
        graph.backward(Phase::Train).unwrap();
        let expected = stack![Axis(0), array![[[0.5, 0.5], [0.5, 0.5]]]].into_dyn();
        assert!(arrays_almost_equal(&expected, &graph.grad_of("in").unwrap()));
    }

    #[test]
    fn test_setup_rejects_non_positive_pooled_dims() {
        let mut graph = Graph::new();
        graph.add("in", LayerConfig::Input(InputConfig { shape: vec![1, 1, 2, 2] }), &[]).unwrap();
        graph.add("pool", LayerConfig::Pooling(PoolingConfig {
            kernel: 4,
            pad: 0,
            stride: 1,
            method: PoolMethod::Max,
            record_mask: false,
        }), &["in"]).unwrap();
        assert!(graph.setup().is_err());
    }
}
