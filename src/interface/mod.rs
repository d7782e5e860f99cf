//! Interfaces between processes sharing elements.
//!
//! An [`Interface`] lists the local elements this process shares with one
//! peer rank (possibly itself, for periodic images on the same rank). When
//! periodicity is involved, entries are grouped in sections: section 0 holds
//! pure-parallel matches and section `t + 1` the matches through transform
//! `t`, meaning the peer element is the image of the local one by `t`.
//!
//! Each interface also stores a `send_order`: sending
//! `values[local_ids[send_order[k]]]` for `k = 0..len` delivers, on the peer,
//! the value matching its own `k`-th entry. Bulk operations therefore never
//! ship index metadata.

pub mod builder;
pub mod ops;
pub mod remap;

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::numbering_error::NumberingError;
use crate::topology::periodicity::{PeriodicExclusion, Periodicity};

pub use builder::{InterfaceSetBuilder, PeriodicCouples};

/// One shared entry: local element `local` matches `peer_local` on the peer
/// through `section` (0 = parallel, `t + 1` = transform `t`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Match {
    pub section: usize,
    pub local: usize,
    pub peer_local: usize,
}

/// Elements shared with a single peer rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    peer: usize,
    local_ids: Vec<usize>,
    transform_index: Option<Vec<usize>>,
    send_order: Vec<usize>,
}

impl Interface {
    /// Build an interface from its entries; returns it with the match ids
    /// aligned with `local_ids`.
    ///
    /// `n_sections` is `n_transforms + 1` with periodicity, `1` without.
    pub(crate) fn from_matches(
        peer: usize,
        n_sections: usize,
        mut entries: Vec<Match>,
        periodicity: Option<&Periodicity>,
    ) -> Result<(Self, Vec<usize>), NumberingError> {
        entries.sort_unstable();
        entries.dedup();

        let n_sections = n_sections.max(1);
        let transform_index = if periodicity.is_some() {
            let mut index = vec![0usize; n_sections + 1];
            for m in &entries {
                if m.section >= n_sections {
                    return Err(NumberingError::UndefinedReverse {
                        transform: m.section - 1,
                    });
                }
                index[m.section + 1] += 1;
            }
            for s in 0..n_sections {
                index[s + 1] += index[s];
            }
            Some(index)
        } else {
            None
        };

        let local_ids: Vec<usize> = entries.iter().map(|m| m.local).collect();
        let match_ids: Vec<usize> = entries.iter().map(|m| m.peer_local).collect();
        let mut itf = Self {
            peer,
            local_ids,
            transform_index,
            send_order: Vec::new(),
        };
        itf.send_order = itf.compute_send_order(&match_ids, periodicity)?;
        Ok((itf, match_ids))
    }

    /// Positions of our entries in the order the peer expects them.
    ///
    /// The peer's section `s` pairs with our section of the reverse transform;
    /// both sides sort a section by (peer element, own element), so sorting
    /// ours by (match, local) reproduces the peer's order.
    fn compute_send_order(
        &self,
        match_ids: &[usize],
        periodicity: Option<&Periodicity>,
    ) -> Result<Vec<usize>, NumberingError> {
        let mut send_order = Vec::with_capacity(self.local_ids.len());
        for s in 0..self.n_sections() {
            let src = match (s, periodicity) {
                (0, _) | (_, None) => s,
                (_, Some(per)) => per.reverse_id(s - 1)? + 1,
            };
            let mut positions: Vec<usize> = self.section(src).collect();
            positions.sort_unstable_by_key(|&p| (match_ids[p], self.local_ids[p]));
            send_order.extend(positions);
        }
        Ok(send_order)
    }

    /// Peer rank.
    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.local_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_ids.is_empty()
    }

    /// Local element ids, sorted within each section.
    pub fn local_ids(&self) -> &[usize] {
        &self.local_ids
    }

    /// Section boundaries (`n_transforms + 2` entries), if periodic.
    pub fn transform_index(&self) -> Option<&[usize]> {
        self.transform_index.as_deref()
    }

    pub fn send_order(&self) -> &[usize] {
        &self.send_order
    }

    /// Number of sections (1 without periodicity).
    pub fn n_sections(&self) -> usize {
        self.transform_index.as_ref().map_or(1, |idx| idx.len() - 1)
    }

    /// Positions belonging to section `s` (empty if out of range).
    pub fn section(&self, s: usize) -> Range<usize> {
        match &self.transform_index {
            Some(idx) if s + 1 < idx.len() => idx[s]..idx[s + 1],
            Some(_) => 0..0,
            None if s == 0 => 0..self.local_ids.len(),
            None => 0..0,
        }
    }

    /// Section of position `p`.
    pub fn section_of(&self, p: usize) -> usize {
        match &self.transform_index {
            Some(idx) => idx.partition_point(|&start| start <= p).saturating_sub(1),
            None => 0,
        }
    }

    /// `true` if section `s` survives `exclusion`.
    pub fn section_included(
        s: usize,
        periodicity: Option<&Periodicity>,
        exclusion: PeriodicExclusion,
    ) -> bool {
        s == 0 || periodicity.is_none_or(|per| !exclusion.excludes(per.kind(s - 1)))
    }

    /// Positions of sections that survive `exclusion`.
    pub fn included_sections<'a>(
        &'a self,
        periodicity: Option<&'a Periodicity>,
        exclusion: PeriodicExclusion,
    ) -> impl Iterator<Item = Range<usize>> + 'a {
        (0..self.n_sections()).filter_map(move |s| {
            Self::section_included(s, periodicity, exclusion).then(|| self.section(s))
        })
    }

    /// Matching element of position `p` on a same-rank interface.
    pub(crate) fn local_match(&self, p: usize) -> usize {
        self.local_ids[self.send_order[p]]
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  interface with rank {}: {} elements", self.peer, self.len())?;
        if let Some(idx) = &self.transform_index {
            writeln!(f, "    transform index: {idx:?}")?;
        }
        for (p, (&elt, &so)) in self.local_ids.iter().zip(&self.send_order).enumerate() {
            writeln!(f, "    {p:>8} : {elt:>10} | send {so:>8}")?;
        }
        Ok(())
    }
}

/// Per-interface peer element ids, aligned with `local_ids`.
#[derive(Debug)]
pub struct MatchIdTable {
    per_interface: Vec<Vec<usize>>,
}

/// Scope guard over materialized match ids; the table is released when the
/// last guard is dropped.
#[derive(Clone, Debug)]
pub struct MatchIds {
    table: Arc<MatchIdTable>,
}

impl MatchIds {
    /// Match ids of interface `i` (empty if out of range).
    pub fn get(&self, i: usize) -> &[usize] {
        self.table
            .per_interface
            .get(i)
            .map_or(&[][..], |v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.table.per_interface.iter().map(Vec::as_slice)
    }
}

/// All interfaces of the local process, ordered by peer rank.
pub struct InterfaceSet<C: Communicator> {
    interfaces: Vec<Interface>,
    periodicity: Option<Arc<Periodicity>>,
    comm: C,
    tag: CommTag,
    match_ids: Mutex<Weak<MatchIdTable>>,
}

/// Tag base of bulk exchanges when none is configured.
pub const DEFAULT_OPS_TAG: CommTag = CommTag::new(0x4E40);

impl<C: Communicator> InterfaceSet<C> {
    /// Assemble a set from ready interfaces; empty interfaces are dropped and
    /// the rest sorted by peer.
    pub fn from_interfaces(
        comm: C,
        mut interfaces: Vec<Interface>,
        periodicity: Option<Arc<Periodicity>>,
    ) -> Self {
        interfaces.retain(|itf| !itf.is_empty());
        interfaces.sort_by_key(Interface::peer);
        Self {
            interfaces,
            periodicity,
            comm,
            tag: DEFAULT_OPS_TAG,
            match_ids: Mutex::new(Weak::new()),
        }
    }

    /// Use `tag` as the base tag of bulk exchanges.
    pub fn with_tag(mut self, tag: CommTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn get(&self, i: usize) -> Option<&Interface> {
        self.interfaces.get(i)
    }

    /// Number of interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Total number of entries over all interfaces.
    pub fn n_elts_total(&self) -> usize {
        self.interfaces.iter().map(Interface::len).sum()
    }

    pub fn periodicity(&self) -> Option<&Periodicity> {
        self.periodicity.as_deref()
    }

    pub(crate) fn periodicity_arc(&self) -> Option<Arc<Periodicity>> {
        self.periodicity.clone()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn local_rank(&self) -> usize {
        self.comm.rank()
    }

    pub(crate) fn tag(&self) -> CommTag {
        self.tag
    }

    /// Interface with the local rank itself (periodic images), if any.
    pub fn same_rank_interface(&self) -> Option<&Interface> {
        let me = self.comm.rank();
        self.interfaces.iter().find(|itf| itf.peer == me)
    }

    /// Number of live [`MatchIds`] guards.
    pub fn match_id_refs(&self) -> usize {
        self.match_ids.lock().strong_count()
    }

    /// Materialize (or share) the peer element ids of every entry.
    ///
    /// Collective when no guard is live: every rank must call it together.
    pub fn match_ids(&self) -> Result<MatchIds, NumberingError> {
        let mut slot = self.match_ids.lock();
        if let Some(table) = slot.upgrade() {
            return Ok(MatchIds { table });
        }
        let received = self.exchange_in_send_order::<u64, _>(self.tag, 1, |_, itf, p, out| {
            out[0] = itf.local_ids[p] as u64;
        })?;
        let per_interface = received
            .into_iter()
            .map(|v| v.into_iter().map(|id| id as usize).collect())
            .collect();
        let table = Arc::new(MatchIdTable { per_interface });
        *slot = Arc::downgrade(&table);
        Ok(MatchIds { table })
    }

    /// For every interface, send `stride` values per entry in send order and
    /// return what the peer sent, aligned with our positions.
    ///
    /// `fill(i, itf, p, out)` writes the `stride` values for position `p` of
    /// interface `i`.
    /// Same-rank interfaces are served from the local send buffer.
    pub(crate) fn exchange_in_send_order<T, F>(
        &self,
        tag: CommTag,
        stride: usize,
        fill: F,
    ) -> Result<Vec<Vec<T>>, NumberingError>
    where
        T: Pod,
        F: Fn(usize, &Interface, usize, &mut [T]),
    {
        let me = self.comm.rank();
        let mut send: Vec<Vec<T>> = Vec::with_capacity(self.interfaces.len());
        for (i, itf) in self.interfaces.iter().enumerate() {
            let mut buf = vec![T::zeroed(); itf.len() * stride];
            for (k, &p) in itf.send_order.iter().enumerate() {
                fill(i, itf, p, &mut buf[k * stride..(k + 1) * stride]);
            }
            send.push(buf);
        }

        // a failed post is kept until everything already posted completes
        let mut maybe_err = None;

        // 1) post all receives
        let mut received: Vec<Vec<T>> = Vec::with_capacity(self.interfaces.len());
        let mut pending_recvs = Vec::new();
        for (i, itf) in self.interfaces.iter().enumerate() {
            if itf.peer == me {
                received.push(send[i].clone());
                continue;
            }
            let mut buffer = vec![T::zeroed(); itf.len() * stride];
            match self
                .comm
                .irecv_result(itf.peer, tag.as_u16(), cast_slice_mut(&mut buffer))
            {
                Ok(h) => pending_recvs.push((i, itf.peer, h)),
                Err(err) => {
                    maybe_err.get_or_insert(err);
                }
            }
            received.push(buffer);
        }

        // 2) post all sends
        let mut pending_sends = Vec::new();
        for (i, itf) in self.interfaces.iter().enumerate() {
            if itf.peer == me {
                continue;
            }
            match self.comm.isend_result(itf.peer, tag.as_u16(), cast_slice(&send[i])) {
                Ok(h) => pending_sends.push(h),
                Err(err) => {
                    maybe_err.get_or_insert(err);
                }
            }
        }

        // 3) wait for all receives, then drain sends
        for (i, nbr, h) in pending_recvs {
            let expected = std::mem::size_of_val(received[i].as_slice());
            match h.wait() {
                Some(raw) if raw.len() == expected => {
                    cast_slice_mut(&mut received[i]).copy_from_slice(&raw);
                }
                Some(raw) if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::BufferSizeMismatch {
                        neighbor: nbr,
                        expected,
                        got: raw.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(NumberingError::CommError {
                        neighbor: nbr,
                        reason: "No data received (wait returned None)".into(),
                    });
                }
                _ => {}
            }
        }
        for h in pending_sends {
            let _ = h.wait();
        }
        drop(send);

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(received),
        }
    }
}

impl<C: Communicator> fmt::Debug for InterfaceSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceSet")
            .field("rank", &self.comm.rank())
            .field("interfaces", &self.interfaces)
            .field("periodic", &self.periodicity.is_some())
            .finish()
    }
}

impl<C: Communicator> fmt::Display for InterfaceSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "interface set on rank {}: {} interfaces, {} entries",
            self.comm.rank(),
            self.len(),
            self.n_elts_total()
        )?;
        for itf in &self.interfaces {
            write!(f, "{itf}")?;
        }
        Ok(())
    }
}
