mod conv;
mod embedding;
mod init;
mod linear;

pub use conv::{pool_width, ConvBranch};
pub use embedding::EmbeddingMatrix;
pub use init::{register, Initializer};
pub use linear::Linear;
