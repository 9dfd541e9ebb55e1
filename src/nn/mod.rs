pub mod blob;
pub mod error;
pub mod graph;
pub mod layers;
pub mod params;
pub mod phase;
pub mod transport;
