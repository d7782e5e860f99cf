#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-numbering
//!
//! mesh-numbering identifies which local elements of a partitioned mesh are
//! copies of the same logical element, across processes and across periodic
//! boundaries, and turns that equivalence into a contiguous, ownership-disjoint
//! global numbering usable by distributed linear-algebra libraries.
//!
//! ## Features
//! - [`InterfaceSetBuilder`](interface::InterfaceSetBuilder): rendezvous-based
//!   discovery of shared elements, with periodic couples closed under
//!   composition of transforms
//! - [`InterfaceSet`](interface::InterfaceSet) bulk operations: copy, sum,
//!   min, max and bitwise-or over all copies, with optional exclusion of
//!   periodic transforms
//! - [`RangeSet`](data::range_set::RangeSet): one owned id interval per
//!   process, with `sync`, `gather` and `scatter` helpers
//! - [`Halo`](data::halo::Halo) for ghost layouts with a single owner per
//!   element
//! - Pluggable communication backends (serial, threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-numbering = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every exchange posts all of its receives before its sends and waits on
//! every handle before returning, so collective calls must be made by every
//! rank of the communicator in the same order.

pub mod algs;
pub mod data;
pub mod interface;
pub mod numbering_error;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    pub use crate::data::datatype::{Datatype, Element, Layout};
    pub use crate::data::halo::{Halo, HaloPeer};
    pub use crate::data::range_set::{Backing, RangeSet, RangeSetConfig};
    pub use crate::interface::{Interface, InterfaceSet, InterfaceSetBuilder, MatchIds};
    pub use crate::numbering_error::NumberingError;
    pub use crate::topology::periodicity::{PeriodicExclusion, Periodicity, PeriodicityKind};
}
