use ndarray::{Axis, IxDyn, Slice};
use crate::utils::{ArrayDynF, GenericResult};

/// Dense numeric buffer owned by a layer. The shape is fixed once allocated:
/// a blob is never resized for the lifetime of one training configuration.
#[derive(Clone, Debug)]
pub struct Blob {
    data: ArrayDynF,
}

impl Blob {
    /// Placeholder used before `Setup` allocates the real buffer.
    pub fn unallocated() -> Self {
        Self { data: ArrayDynF::zeros(IxDyn(&[0])) }
    }

    pub fn zeros(shape: &[usize]) -> GenericResult<Self> {
        if shape.is_empty() || shape.iter().any(|&d| d == 0) {
            return Err(anyhow::anyhow!("invalid blob shape {:?}: dimensions must be positive", shape));
        }
        Ok(Self { data: ArrayDynF::zeros(IxDyn(shape)) })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of elements (product of the shape).
    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn view(&self) -> ndarray::ArrayViewD<f32> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ndarray::ArrayViewMutD<f32> {
        self.data.view_mut()
    }

    pub fn to_array(&self) -> ArrayDynF {
        self.data.clone()
    }

    /// Overwrite the contents. The shape must match exactly; assignment never
    /// reallocates.
    pub fn assign(&mut self, values: &ndarray::ArrayViewD<f32>) -> GenericResult<()> {
        if self.data.shape() != values.shape() {
            return Err(anyhow::anyhow!(
                "blob shape mismatch: expected {:?}, got {:?}",
                self.data.shape(),
                values.shape()
            ));
        }
        self.data.assign(values);
        Ok(())
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Additive accumulation, the backward-pass write mode.
    pub fn add(&mut self, contribution: &ndarray::ArrayViewD<f32>) -> GenericResult<()> {
        if self.data.shape() != contribution.shape() {
            return Err(anyhow::anyhow!(
                "blob shape mismatch: expected {:?}, got {:?}",
                self.data.shape(),
                contribution.shape()
            ));
        }
        self.data.zip_mut_with(contribution, |a, b| *a += b);
        Ok(())
    }

    /// Contiguous read view of `range` along `axis`, used by connection
    /// layers to hand each neighbor its sub-blob.
    pub fn slice_axis(&self, axis: usize, range: std::ops::Range<usize>) -> ndarray::ArrayViewD<f32> {
        self.data.slice_axis(Axis(axis), Slice::from(range))
    }

    pub fn slice_axis_mut(&mut self, axis: usize, range: std::ops::Range<usize>) -> ndarray::ArrayViewMutD<f32> {
        self.data.slice_axis_mut(Axis(axis), Slice::from(range))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use super::*;

    #[test]
    fn test_count_is_shape_product() {
        let blob = Blob::zeros(&[2, 3, 4]).unwrap();
        assert_eq!(blob.count(), 24);
        assert_eq!(blob.shape(), &[2, 3, 4]);
    }

    #[test]
    fn test_zero_sized_dim_rejected() {
        assert!(Blob::zeros(&[2, 0, 4]).is_err());
        assert!(Blob::zeros(&[]).is_err());
    }

    #[test]
    fn test_assign_rejects_resize() {
        let mut blob = Blob::zeros(&[2, 2]).unwrap();
        let bad = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        assert!(blob.assign(&bad.view()).is_err());
        assert_eq!(blob.shape(), &[2, 2]);
    }

    #[test]
    fn test_add_accumulates() {
        let mut blob = Blob::zeros(&[3]).unwrap();
        let ones = array![1.0, 1.0, 1.0].into_dyn();
        blob.add(&ones.view()).unwrap();
        blob.add(&ones.view()).unwrap();
        assert_eq!(blob.to_array(), array![2.0, 2.0, 2.0].into_dyn());
    }

    #[test]
    fn test_slice_axis_ranges() {
        let mut blob = Blob::zeros(&[2, 4]).unwrap();
        blob.assign(&array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]].into_dyn().view()).unwrap();
        let left = blob.slice_axis(1, 0..2);
        assert_eq!(left.to_owned(), array![[1.0, 2.0], [5.0, 6.0]].into_dyn());
        let right = blob.slice_axis(1, 2..4);
        assert_eq!(right.to_owned(), array![[3.0, 4.0], [7.0, 8.0]].into_dyn());
    }
}
