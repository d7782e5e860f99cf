//! Top-level module for periodic topology descriptors.
//!
//! A [`Periodicity`] lists the geometric transforms relating periodic
//! images, with their reverses and the combination tables of composed
//! transforms.

pub mod periodicity;

pub use periodicity::{PeriodicExclusion, Periodicity, PeriodicityKind};
