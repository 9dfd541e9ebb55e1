pub mod bridge_layer;
pub mod dropout_layer;
pub mod filtering;
pub mod gru_layer;
pub mod hidden_layer;
pub mod input_layer;
pub mod nn_layers;
pub mod slice_layer;
