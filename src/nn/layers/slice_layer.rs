use std::ops::Range;
use nohash_hasher::IntMap;
use crate::nn::blob::Blob;
use crate::nn::error::LayerError;
use crate::nn::layers::nn_layers::{
    BackwardData, EmptyLayerResult, ForwardData, LayerId, SetupData, SetupResult,
};

#[derive(Clone, Debug)]
pub struct SliceConfig {
    /// Dimension to split along.
    pub dim: usize,
}

/// Connects a single source layer with multiple destination layers by
/// splitting the source blob along one dimension into contiguous sub-blobs,
/// one per destination. The concatenation of all destination views along the
/// slice dimension reconstructs the source exactly, with no overlap and no
/// gap.
///
/// Forward relays a copy of the source blob; neighbor-keyed accessors carve
/// per-destination views out of it. Backward: destinations have already
/// accumulated their gradients into this layer's grad blob (each into its
/// own disjoint range), which is then added into the source's grad blob.
pub struct SliceLayer {
    config: SliceConfig,
    ranges: Vec<Range<usize>>,
    dst_index: IntMap<LayerId, usize>,
}

impl SliceLayer {
    pub fn new(config: SliceConfig) -> Self {
        Self { config, ranges: Vec::new(), dst_index: IntMap::default() }
    }

    /// Sizes of the per-destination slices, in destination order.
    pub fn slice_sizes(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.end - r.start).collect()
    }

    pub fn setup(&mut self, name: &str, data: SetupData) -> SetupResult {
        if data.sources.len() != 1 {
            return Err(LayerError::configuration(
                name,
                format!("expected exactly 1 source, got {}", data.sources.len()),
            ));
        }
        let n = data.dst_ids.len();
        if n == 0 {
            return Err(LayerError::configuration(name, "slice layer has no destination layers"));
        }

        let src_shape = data.sources[0].data(Some(data.me))?.shape().to_vec();
        let dim = self.config.dim;
        if dim >= src_shape.len() {
            return Err(LayerError::configuration(
                name,
                format!("slice dimension {} out of range for source shape {:?}", dim, src_shape),
            ));
        }

        let total = src_shape[dim];
        if total < n {
            return Err(LayerError::configuration(
                name,
                format!("cannot slice dimension of size {} into {} parts", total, n),
            ));
        }

        // Ceiling distribution: when not evenly divisible, earlier
        // destinations receive one extra unit each. Deterministic, so runs
        // reproduce across partition counts.
        let base = total / n;
        let remainder = total % n;
        let mut start = 0;
        self.ranges.clear();
        self.dst_index.clear();
        for (i, dst) in data.dst_ids.iter().enumerate() {
            let len = base + usize::from(i < remainder);
            self.ranges.push(start..start + len);
            self.dst_index.insert(*dst, i);
            start += len;
        }

        Ok(src_shape)
    }

    pub fn forward(&mut self, _name: &str, out: &mut Blob, ctx: ForwardData) -> EmptyLayerResult {
        out.assign(&ctx.sources[0].data(Some(ctx.me))?)
    }

    pub fn backward(&mut self, _name: &str, _data: &Blob, grad: &Blob, mut ctx: BackwardData) -> EmptyLayerResult {
        // The destination ranges are disjoint and together cover the whole
        // blob, so the grad blob already holds the merged contribution.
        let me = ctx.me;
        ctx.sources[0].accumulate_grad(me, &grad.view())
    }

    fn slice_range(&self, name: &str, from: Option<LayerId>) -> crate::utils::GenericResult<Option<Range<usize>>> {
        match from {
            None => Ok(None),
            Some(id) => match self.dst_index.get(&id) {
                Some(&i) => Ok(Some(self.ranges[i].clone())),
                None => Err(LayerError::compute(
                    name,
                    format!("layer id {:?} is not a destination of this slice layer", id),
                )),
            },
        }
    }

    pub(crate) fn data_view<'a>(
        &self,
        name: &str,
        blob: &'a Blob,
        from: Option<LayerId>,
    ) -> crate::utils::GenericResult<ndarray::ArrayViewD<'a, f32>> {
        match self.slice_range(name, from)? {
            Some(range) => Ok(blob.slice_axis(self.config.dim, range)),
            None => Ok(blob.view()),
        }
    }

    pub(crate) fn data_view_mut<'a>(
        &self,
        name: &str,
        blob: &'a mut Blob,
        from: Option<LayerId>,
    ) -> crate::utils::GenericResult<ndarray::ArrayViewMutD<'a, f32>> {
        match self.slice_range(name, from)? {
            Some(range) => Ok(blob.slice_axis_mut(self.config.dim, range)),
            None => Ok(blob.view_mut()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::nn::graph::Graph;
    use crate::nn::layers::dropout_layer::DropoutConfig;
    use crate::nn::layers::input_layer::InputConfig;
    use crate::nn::layers::nn_layers::{LayerConfig, LayerKind};
    use super::*;

    fn sliced_sizes(total: usize, destinations: usize) -> Vec<usize> {
        let mut graph = Graph::new();
        graph.add("in", LayerConfig::Input(InputConfig { shape: vec![1, total] }), &[]).unwrap();
        graph.add("slice", LayerConfig::Slice(SliceConfig { dim: 1 }), &["in"]).unwrap();
        for i in 0..destinations {
            graph.add(&format!("dst{}", i), LayerConfig::Dropout(DropoutConfig { drop: 0.5 }), &["slice"]).unwrap();
        }
        graph.setup().unwrap();
        match graph.layer("slice").unwrap().kind() {
            LayerKind::Slice(slice) => slice.slice_sizes(),
            _ => panic!("expected a slice layer"),
        }
    }

    #[test]
    fn test_even_distribution() {
        assert_eq!(sliced_sizes(6, 3), vec![2, 2, 2]);
    }

    #[test]
    fn test_ceiling_distribution_favors_earlier_destinations() {
        // 7 units across 3 destinations: earlier destinations get the extra.
        assert_eq!(sliced_sizes(7, 3), vec![3, 2, 2]);
        assert_eq!(sliced_sizes(5, 4), vec![2, 1, 1, 1]);
    }

    #[test]
    fn test_single_destination_takes_everything() {
        assert_eq!(sliced_sizes(4, 1), vec![4]);
    }
}
