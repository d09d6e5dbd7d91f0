//! A dual implicit/explicit engine for growing natural fracture networks in
//! a layered subsurface rock volume.
//!
//! The crate is organised bottom-up:
//!
//! - [`tensor`] — the symmetric second- and fourth-order tensor kernel.
//! - [`geometry`] — point frames and gridblock trilinear geometry.
//! - [`mechanics`] — per-gridblock material properties and stress/strain
//!   state.
//! - [`dipset`] — a single co-oriented, co-dipping fracture population.
//! - [`fractureset`] — a gridblock fracture set owning one or more dipsets.
//! - [`coupling`] — cross-set stress-shadow projection matrices.
//! - [`implicit`] — the per-gridblock statistical timestep driver.
//! - [`explicit`] — the nucleation-ordered discrete fracture network driver,
//!   and the global fracture registry.
//! - [`grid`] — [`grid::FractureGrid`], the top-level entry point.
//! - [`rng`] — deterministic per-gridblock RNG substreams.
//! - [`config`] — TOML-driven configuration for the demo harness.

pub mod coupling;
pub mod dipset;
pub mod errors;
pub mod explicit;
pub mod fractureset;
pub mod geometry;
pub mod grid;
pub mod implicit;
pub mod mechanics;
pub mod rng;
pub mod tensor;

pub mod config;

pub use errors::{Error, ErrorKind, Result};
