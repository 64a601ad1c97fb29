//! # neurolink-core: shared data model for the NeuroLink pet app
//!
//! - [`value`]: `StructuredValue`, the closed six-kind value model the store codec speaks
//! - [`pet`]: `PetState`, the one persisted record, plus its simulation rules

pub mod pet;
pub mod value;

pub use pet::{clamp_gauge, PetState};
pub use value::{Record, StructuredValue, UnsupportedValueKind};
