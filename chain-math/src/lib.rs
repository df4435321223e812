//! Chain kinematics for a two-motor hanging-sled machine.
//!
//! Two motors at fixed anchors reel chains attached to a sled hanging over
//! the work area; the cutting position is determined entirely by the two
//! chain lengths. This crate provides:
//!
//! - **Inverse transform**: Cartesian target to chain lengths, modelling
//!   sprocket wrap, catenary sag, pitch tolerance, and elastic stretch
//! - **Forward transform**: chain lengths back to Cartesian, via an
//!   iterative error-feedback solver seeded from the previous solution
//! - **Simple fallback**: sag-free circle intersection for machines
//!   calibrated with scaling corrections instead of the sag model
//!
//! # Example
//!
//! ```
//! use chain_math::{ChainConfig, Kinematics};
//! use nalgebra::Vector2;
//!
//! let cfg = ChainConfig::default();
//! let mut kin = Kinematics::new();
//!
//! let lengths = kin.lengths(&cfg, Vector2::new(0.0, 0.0));
//! let position = kin.position(&cfg, lengths);
//! assert!(position.norm() < 0.1);
//! ```

pub mod forward;
pub mod geometry;
pub mod inverse;

pub use forward::{
    simple_position, ChainErrorSolver, ForwardSolver, Kinematics, DEFAULT_MAX_ERROR_MM,
    DEFAULT_MAX_GUESSES,
};
pub use geometry::{ChainConfig, ChainRouting, SledGeometry, SPROCKET_RADIUS};
pub use inverse::{chain_lengths, ChainLengths};
