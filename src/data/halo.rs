//! Ghost-element halo.
//!
//! A [`Halo`] is the simpler alternative to an interface set for elements
//! with a single owner (cells, typically): each process stores its `n_local`
//! owned elements first, followed by ghost copies grouped by owning rank in
//! contiguous ranges. [`Halo::sync`] overwrites ghosts with their owner's
//! value; there is no reduction.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use hashbrown::HashSet;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::numbering_error::NumberingError;
use crate::topology::periodicity::Periodicity;

/// Tag of halo exchanges when none is configured.
pub const DEFAULT_HALO_TAG: CommTag = CommTag::new(0x4E80);

/// Exchange pattern with one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloPeer {
    pub rank: usize,
    /// Owned elements whose values the peer keeps as ghosts, in the order
    /// the peer stores them.
    pub send_ids: Vec<usize>,
    /// First ghost element owned by `rank`.
    pub ghost_start: usize,
    pub ghost_len: usize,
}

impl HaloPeer {
    fn ghosts(&self) -> std::ops::Range<usize> {
        self.ghost_start..self.ghost_start + self.ghost_len
    }
}

/// Owned elements followed by ghosts, with one exchange pattern per peer.
pub struct Halo<C: Communicator> {
    n_local: usize,
    n_ghost: usize,
    peers: Vec<HaloPeer>,
    comm: C,
    periodicity: Option<Arc<Periodicity>>,
    tag: CommTag,
}

impl<C: Communicator> Halo<C> {
    /// Validate and assemble a halo.
    ///
    /// Ghost ranges must tile `[n_local, n_local + n_ghost)` without gaps or
    /// overlaps; a peer equal to the local rank (periodic ghosts) must send
    /// exactly as many values as it receives.
    pub fn new(comm: C, n_local: usize, mut peers: Vec<HaloPeer>) -> Result<Self, NumberingError> {
        let size = comm.size();
        let mut seen = HashSet::with_capacity(peers.len());
        for peer in &peers {
            if peer.rank >= size {
                return Err(NumberingError::InvalidPeer {
                    rank: peer.rank,
                    size,
                });
            }
            if !seen.insert(peer.rank) {
                return Err(NumberingError::InvalidHalo(format!(
                    "rank {} listed twice",
                    peer.rank
                )));
            }
            if let Some(&id) = peer.send_ids.iter().find(|&&id| id >= n_local) {
                return Err(NumberingError::ElementOutOfRange {
                    index: id,
                    n_elts: n_local,
                });
            }
            if peer.rank == comm.rank() && peer.send_ids.len() != peer.ghost_len {
                return Err(NumberingError::InvalidHalo(format!(
                    "local periodic ghosts: {} sent, {} received",
                    peer.send_ids.len(),
                    peer.ghost_len
                )));
            }
        }

        let mut ranges: Vec<_> = peers
            .iter()
            .filter(|p| p.ghost_len > 0)
            .map(HaloPeer::ghosts)
            .collect();
        ranges.sort_unstable_by_key(|r| r.start);
        let mut next = n_local;
        for r in &ranges {
            if r.start != next {
                return Err(NumberingError::InvalidHalo(format!(
                    "ghost range {r:?} does not start at element {next}"
                )));
            }
            next = r.end;
        }

        peers.sort_by_key(|p| p.rank);
        Ok(Self {
            n_local,
            n_ghost: next - n_local,
            peers,
            comm,
            periodicity: None,
            tag: DEFAULT_HALO_TAG,
        })
    }

    /// Mark the halo as carrying periodic ghosts.
    pub fn with_periodicity(mut self, periodicity: Arc<Periodicity>) -> Self {
        self.periodicity = Some(periodicity);
        self
    }

    pub fn with_tag(mut self, tag: CommTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn n_ghost(&self) -> usize {
        self.n_ghost
    }

    /// Owned plus ghost elements.
    pub fn n_elts(&self) -> usize {
        self.n_local + self.n_ghost
    }

    pub fn peers(&self) -> &[HaloPeer] {
        &self.peers
    }

    pub fn periodicity(&self) -> Option<&Periodicity> {
        self.periodicity.as_deref()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Overwrite every ghost with its owner's `stride` values.
    pub fn sync<T: Pod>(&self, stride: usize, values: &mut [T]) -> Result<(), NumberingError> {
        let expected = self.n_elts() * stride;
        if values.len() != expected {
            return Err(NumberingError::LengthMismatch {
                what: "halo values",
                expected,
                got: values.len(),
            });
        }
        let me = self.comm.rank();
        let tag = self.tag.as_u16();

        let send: Vec<Vec<T>> = self
            .peers
            .iter()
            .map(|p| {
                p.send_ids
                    .iter()
                    .flat_map(|&id| values[id * stride..(id + 1) * stride].iter().copied())
                    .collect()
            })
            .collect();

        // 1) post all receives
        let mut pending_recvs = Vec::new();
        for p in self.peers.iter().filter(|p| p.rank != me && p.ghost_len > 0) {
            let mut buffer = vec![T::zeroed(); p.ghost_len * stride];
            let h = self.comm.irecv_result(p.rank, tag, cast_slice_mut(&mut buffer))?;
            pending_recvs.push((p, h, buffer));
        }

        // 2) post all sends
        let mut pending_sends = Vec::new();
        for (p, buf) in self.peers.iter().zip(&send) {
            if p.rank != me && !buf.is_empty() {
                pending_sends.push(self.comm.isend_result(p.rank, tag, cast_slice(buf))?);
            }
        }

        // local periodic ghosts
        for (p, buf) in self.peers.iter().zip(&send) {
            if p.rank == me {
                values[p.ghost_start * stride..(p.ghost_start + p.ghost_len) * stride]
                    .copy_from_slice(buf);
            }
        }

        // 3) wait for every receive, then drain sends
        let mut maybe_err = None;
        for (p, h, mut buffer) in pending_recvs {
            let expected = std::mem::size_of_val(buffer.as_slice());
            match h.wait() {
                Some(raw) if raw.len() == expected => {
                    cast_slice_mut(&mut buffer).copy_from_slice(&raw);
                    values[p.ghost_start * stride..(p.ghost_start + p.ghost_len) * stride]
                        .copy_from_slice(&buffer);
                }
                Some(raw) if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::BufferSizeMismatch {
                        neighbor: p.rank,
                        expected,
                        got: raw.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::CommError {
                        neighbor: p.rank,
                        reason: "ghost values not received".into(),
                    });
                }
                _ => {}
            }
        }
        for h in pending_sends {
            let _ = h.wait();
        }

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C: Communicator> fmt::Debug for Halo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Halo")
            .field("rank", &self.comm.rank())
            .field("n_local", &self.n_local)
            .field("n_ghost", &self.n_ghost)
            .field("peers", &self.peers)
            .finish()
    }
}
