//! Data module: element datatypes, halos and range sets

pub mod datatype;
pub mod halo;
pub mod range_set;

pub use datatype::{Datatype, Element, Layout};
pub use halo::{Halo, HaloPeer};
pub use range_set::{RangeSet, RangeSetConfig};
