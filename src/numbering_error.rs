//! NumberingError: unified error type for mesh-numbering public APIs
//!
//! Configuration problems (periodicity, datatype, exclusion policy) and
//! transport inconsistencies are all reported through this enum so callers
//! can propagate them with `?` instead of aborting inside the library.

use thiserror::Error;

use crate::data::datatype::Datatype;

/// Unified error type for interface-set and range-set operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumberingError {
    /// A declared periodic couple list names a periodicity with no transform.
    #[error("no transform defined for periodicity {periodicity_num} (direction {direction})")]
    UndefinedTransform {
        periodicity_num: usize,
        direction: i8,
    },
    /// A transform's reverse id is missing or is not an involution.
    #[error("transform {transform} has no valid reverse transform")]
    UndefinedReverse { transform: usize },
    /// A composed transform refers to parents whose combination is undefined.
    #[error("cannot resolve composition of level-{level} transform {transform}: missing parent relation")]
    UnresolvedComposition { transform: usize, level: usize },
    /// Transforms must be stored by non-decreasing composition level.
    #[error("transform {transform} of level {level} follows a transform of higher level")]
    TransformOrder { transform: usize, level: usize },
    /// A periodic couple names a global number held by no process.
    #[error("periodic couple refers to global number {global_number}, which no process holds")]
    UnresolvedPeriodicCouple { global_number: u64 },
    /// The requested operation has no meaning for the element datatype.
    #[error("operation `{op}` does not support datatype {datatype:?}")]
    UnsupportedDatatype { op: &'static str, datatype: Datatype },
    /// Ignoring only rotational periodicity while rotations are present.
    #[error("ignoring rotational periodicity only is not supported when rotations are present")]
    UnsupportedExclusion,
    /// Halo-backed range sets cannot merge or split periodic images.
    #[error("periodic exclusion is not supported for halo-backed range sets")]
    UnsupportedHaloExclusion,
    /// A message could not be received or had an unexpected shape.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// Received payload size does not match the negotiated size.
    #[error("buffer size mismatch with rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// A caller-supplied array has the wrong length.
    #[error("length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// An element index lies outside `[0, n_elts)`.
    #[error("element index {index} out of range (n_elts = {n_elts})")]
    ElementOutOfRange { index: usize, n_elts: usize },
    /// Renumbering while match ids are materialized would invalidate them.
    #[error("match ids are materialized ({refs} live handles); release them first")]
    MatchIdsInUse { refs: usize },
    /// A byte buffer is not aligned for the requested datatype.
    #[error("byte buffer is not aligned or sized for datatype {0:?}")]
    BufferAlignment(Datatype),
    /// Halo description is inconsistent.
    #[error("invalid halo: {0}")]
    InvalidHalo(String),
    /// Shifting ids by `id_base` leaves the `u64` range.
    #[error("global ids overflow u64 when shifted by id_base {id_base}")]
    IdOverflow { id_base: u64 },
    /// In-place compaction would read a slot it already overwrote.
    #[error("in-place {op} would move element {index} forward to slot {slot}")]
    InPlaceOrder {
        op: &'static str,
        index: usize,
        slot: usize,
    },
    /// A rank outside the communicator was named.
    #[error("rank {rank} is outside the communicator of size {size}")]
    InvalidPeer { rank: usize, size: usize },
}
