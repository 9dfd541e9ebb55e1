use ndarray::{azip, Array, Array0, Array1, Array2, Array3, Array4, IxDyn};

type F = f32;
pub type ArrayF<D> = Array<F, D>;
pub type Array0F = Array0<F>;
pub type Array1F = Array1<F>;
pub type Array2F = Array2<F>;
pub type Array3F = Array3<F>;
pub type Array4F = Array4<F>;
pub type ArrayDynF = Array<F, IxDyn>;

pub type GenericResult<T> = anyhow::Result<T>;

pub fn arrays_almost_equal<D: ndarray::Dimension>(arr1: &ArrayF<D>, arr2: &ArrayF<D>) -> bool {
    arr1.shape() == arr2.shape() && azip!(arr1, arr2).all(|a, b| (a - b).abs() < 0.001)
}

pub const EPSILON: f32 = 0.0000001;

#[cfg(test)]
mod tests {
    use ndarray::array;
    use super::*;

    #[test]
    fn test_arrays_almost_equal() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(arrays_almost_equal(&a, &(a.clone() + 0.0005)));
        assert!(!arrays_almost_equal(&a, &(a.clone() + 0.1)));
    }
}
