pub mod nn;
pub mod utils;

pub use utils::{Array1F, Array2F, Array3F, Array4F, ArrayDynF};
