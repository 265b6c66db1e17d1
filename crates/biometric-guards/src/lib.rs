mod layer;
mod signature;
mod temporal;
#[cfg(test)]
mod tests;

pub use layer::LayerValidator;
pub use signature::{SignatureValidator, ValidatedSignature};
pub use temporal::TemporalSynchronizer;
