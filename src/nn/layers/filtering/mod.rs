use std::ops::Range;
use crate::utils::GenericResult;

pub mod pooling;

/// Shared geometry of a sliding pooling window over a 4D
/// (batch, channel, height, width) blob. Both pooling variants compose this
/// instead of subclassing each other.
#[derive(Clone, Copy, Debug)]
pub struct PoolGeometry {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub pooled_height: usize,
    pub pooled_width: usize,
    pub kernel: usize,
    pub pad: usize,
    pub stride: usize,
}

impl PoolGeometry {
    pub fn from_shape(shape: &[usize], kernel: usize, pad: usize, stride: usize) -> GenericResult<Self> {
        if shape.len() != 4 {
            return Err(anyhow::anyhow!("expected a 4D (batch, channel, height, width) blob, got shape {:?}", shape));
        }
        if kernel == 0 || stride == 0 {
            return Err(anyhow::anyhow!("kernel and stride must be positive (kernel={}, stride={})", kernel, stride));
        }
        if pad >= kernel {
            return Err(anyhow::anyhow!("padding {} must be smaller than the kernel {}", pad, kernel));
        }

        let pooled_dim = |dim: usize| -> GenericResult<usize> {
            let numerator = dim as i64 + 2 * pad as i64 - kernel as i64;
            let pooled = numerator.div_euclid(stride as i64) + 1;
            if numerator < 0 || pooled <= 0 {
                return Err(anyhow::anyhow!(
                    "pooled dimension is non-positive for input dim {} (kernel={}, pad={}, stride={})",
                    dim, kernel, pad, stride
                ));
            }
            Ok(pooled as usize)
        };

        Ok(Self {
            batch: shape[0],
            channels: shape[1],
            height: shape[2],
            width: shape[3],
            pooled_height: pooled_dim(shape[2])?,
            pooled_width: pooled_dim(shape[3])?,
            kernel,
            pad,
            stride,
        })
    }

    pub fn pooled_shape(&self) -> Vec<usize> {
        vec![self.batch, self.channels, self.pooled_height, self.pooled_width]
    }

    /// In-bounds input ranges covered by the window at pooled position
    /// (ph, pw). Parts of the window that fall into the padding are clipped,
    /// so boundary windows are smaller than kernel x kernel.
    pub fn window(&self, ph: usize, pw: usize) -> (Range<usize>, Range<usize>) {
        let clip = |p: usize, bound: usize| {
            let start = p as i64 * self.stride as i64 - self.pad as i64;
            let end = (start + self.kernel as i64).min(bound as i64) as usize;
            (start.max(0) as usize)..end
        };
        (clip(ph, self.height), clip(pw, self.width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pooled_dims_4x4_kernel2_stride2() {
        let geo = PoolGeometry::from_shape(&[1, 2, 4, 4], 2, 0, 2).unwrap();
        assert_eq!(geo.pooled_height, 2);
        assert_eq!(geo.pooled_width, 2);
        assert_eq!(geo.pooled_shape(), vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_pooled_dims_with_padding() {
        // floor((5 + 2*1 - 3) / 2) + 1 = 3
        let geo = PoolGeometry::from_shape(&[1, 1, 5, 5], 3, 1, 2).unwrap();
        assert_eq!(geo.pooled_height, 3);
        assert_eq!(geo.pooled_width, 3);
    }

    #[test]
    fn test_non_positive_pooled_dim_fails() {
        assert!(PoolGeometry::from_shape(&[1, 1, 2, 2], 4, 0, 1).is_err());
    }

    #[test]
    fn test_window_clips_padding() {
        let geo = PoolGeometry::from_shape(&[1, 1, 5, 5], 3, 1, 2).unwrap();
        // Top-left window starts in the padding.
        let (h, w) = geo.window(0, 0);
        assert_eq!((h, w), (0..2, 0..2));
        // Interior window is full size.
        let (h, w) = geo.window(1, 1);
        assert_eq!((h, w), (1..4, 1..4));
        // Bottom-right window is clipped at the far edge.
        let (h, w) = geo.window(2, 2);
        assert_eq!((h, w), (3..5, 3..5));
    }
}
