//! Tensor algebra kernel.
//!
//! Components are fixed-layout value types backed by contiguous arrays
//! rather than string- or map-keyed lookups: a [`Tensor2SComponent`] is a
//! plain enum index into a `[f64; 6]`, and a pair of them indexes into the
//! `[f64; 36]` backing a [`Tensor4_2Sx2S`].

mod tensor2s;
mod tensor4;
mod vector;

pub use tensor2s::{Tensor2S, Tensor2SComponent, VectorXYZEigen};
pub use tensor4::Tensor4_2Sx2S;
pub use vector::VectorXYZ;

/// The six independent components of a symmetric second-order tensor, in
/// the fixed layout used to back both [`Tensor2S`] and the rows/columns of
/// [`Tensor4_2Sx2S`].
pub const ALL_COMPONENTS: [Tensor2SComponent; 6] = [
    Tensor2SComponent::XX,
    Tensor2SComponent::YY,
    Tensor2SComponent::ZZ,
    Tensor2SComponent::XY,
    Tensor2SComponent::YZ,
    Tensor2SComponent::ZX,
];
