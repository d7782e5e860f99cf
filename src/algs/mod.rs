//! Communication and exchange primitives.

pub mod all_to_all;
pub mod block_dist;
pub mod communicator;
pub mod wire;

pub use all_to_all::exchange_records;
pub use block_dist::BlockDistribution;
