//! Contiguous block partition of the global-number space.
//!
//! Every rank computes the same partition from the global maximum, so the
//! rendezvous owner of a global number depends only on the number itself.

use crate::algs::communicator::{CommTag, Communicator};
use crate::numbering_error::NumberingError;

/// Even split of `[0, global_max]` into `n_ranks` consecutive blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockDistribution {
    n_ranks: usize,
    block_size: u64,
    global_max: u64,
}

impl BlockDistribution {
    /// Agree on the partition collectively from each rank's largest number.
    pub fn new<C: Communicator>(
        comm: &C,
        tag: CommTag,
        local_max: u64,
    ) -> Result<Self, NumberingError> {
        let global_max = comm.allreduce_max_u64(tag, local_max)?;
        Ok(Self::from_global_max(comm.size(), global_max))
    }

    pub fn from_global_max(n_ranks: usize, global_max: u64) -> Self {
        let n_ranks = n_ranks.max(1);
        Self {
            n_ranks,
            block_size: global_max / n_ranks as u64 + 1,
            global_max,
        }
    }

    /// Rendezvous owner of `gnum`.
    #[inline]
    pub fn owner_of(&self, gnum: u64) -> usize {
        ((gnum / self.block_size) as usize).min(self.n_ranks - 1)
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn global_max(&self) -> u64 {
        self.global_max
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }
}
