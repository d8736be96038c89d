#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(any(feature = "mkl", feature = "mkl-dynamic"))]
extern crate intel_mkl_src;

mod cnn_dssm;
mod config;
mod description;
mod tower;

pub use cnn_dssm::{CnnDssm, DssmInputs, SHARED_EMBEDDINGS};
pub use config::CnnDssmConfig;
pub use description::{
    InputDescription, LayerDescription, LayerKind, ModelDescription, ParameterDescription,
};
pub use tower::ConvTower;
