//! Contiguous, ownership-disjoint global numbering.
//!
//! A [`RangeSet`] assigns every local element a global id such that each
//! process owns one contiguous interval `[start, end)`, the intervals of all
//! processes partition `[id_base, id_base + n_distinct)`, and all copies of
//! a shared element carry the same id. It is backed by an
//! [`InterfaceSet`] (elements shared on process boundaries), a [`Halo`]
//! (owned elements followed by ghosts) or nothing (single process).
//!
//! ## Ownership marking
//!
//! With an interface set, every element starts with mark `0`. Each
//! cross-process interface raises the mark of its elements to
//! `max(rank, peer) + 2`, or, with balancing, gives the first half of the
//! interface (in the lower rank's order) `min(rank, peer) + 2`. The higher
//! copy of every same-process periodic pair is then marked `1`. Elements
//! marked `0` or `rank + 2` are owned; an exclusive scan of the owned counts
//! yields each process's interval, and a maximum reduction over the
//! interfaces hands every copy its owner's id.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::all_to_all::agree;
use crate::algs::communicator::{CommTag, Communicator};
use crate::data::datatype::{
    Datatype, Element, Layout, bytes_as, bytes_as_mut, with_element_type,
};
use crate::data::halo::Halo;
use crate::interface::{Interface, InterfaceSet};
use crate::numbering_error::NumberingError;
use crate::topology::periodicity::PeriodicExclusion;

/// Tag of the scan used by halo-backed and standalone range sets.
pub const DEFAULT_SCAN_TAG: CommTag = CommTag::new(0x4EC0);

// offsets from the interface set's tag base
const TAG_AGREE: u16 = 7;
const TAG_SCAN: u16 = 8;

/// Range-set construction options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSetConfig {
    /// Split two-way shared elements between the two ranks.
    pub balance: bool,
    /// Periodic images whose transform is excluded keep distinct ids.
    pub exclusion: PeriodicExclusion,
    /// Global id of the first element of rank 0.
    pub id_base: u64,
}

impl Default for RangeSetConfig {
    fn default() -> Self {
        Self {
            balance: false,
            exclusion: PeriodicExclusion::None,
            id_base: 0,
        }
    }
}

/// Structure a range set was built from.
pub enum Backing<'a, C: Communicator> {
    Standalone,
    Interfaces(&'a InterfaceSet<C>),
    Halo(&'a Halo<C>),
}

impl<C: Communicator> Clone for Backing<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Communicator> Copy for Backing<'_, C> {}

impl<C: Communicator> fmt::Debug for Backing<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => f.write_str("Standalone"),
            Self::Interfaces(ifs) => write!(f, "Interfaces({} interfaces)", ifs.len()),
            Self::Halo(halo) => write!(f, "Halo({} ghosts)", halo.n_ghost()),
        }
    }
}

/// Global ids of the local elements and the owned id interval.
pub struct RangeSet<'a, C: Communicator> {
    n_elts: usize,
    n_leading: usize,
    l_range: Range<u64>,
    g_id: Cow<'a, [u64]>,
    backing: Backing<'a, C>,
    exclusion: PeriodicExclusion,
}

fn leading_run(l_range: &Range<u64>, g_id: &[u64]) -> usize {
    g_id.iter()
        .zip(l_range.start..)
        .take_while(|&(&g, expected)| g == expected)
        .count()
}

/// `[start, start + n)` shifted by `id_base`.
fn shifted_range(start: u64, n: u64, id_base: u64) -> Result<Range<u64>, NumberingError> {
    start
        .checked_add(id_base)
        .and_then(|lo| Some(lo..lo.checked_add(n)?))
        .ok_or(NumberingError::IdOverflow { id_base })
}

/// Final id of a marked id (owners start at 2).
fn shifted_id(g: u64, id_base: u64) -> Result<u64, NumberingError> {
    match g.checked_sub(2) {
        Some(id) => id.checked_add(id_base),
        None => Some(id_base.saturating_sub(2 - g)),
    }
    .ok_or(NumberingError::IdOverflow { id_base })
}

fn sequential_ids(start: u64, n_elts: usize) -> Vec<u64> {
    #[cfg(feature = "rayon")]
    {
        (0..n_elts).into_par_iter().map(|i| start + i as u64).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n_elts).map(|i| start + i as u64).collect()
    }
}

/// Ownership marks of the elements of `ifs` (see the module docs).
fn ownership_marks<C: Communicator>(
    ifs: &InterfaceSet<C>,
    n_elts: usize,
    config: &RangeSetConfig,
) -> Result<Vec<u64>, NumberingError> {
    let me = ifs.local_rank();
    let periodicity = ifs.periodicity();
    let mut marks = vec![0u64; n_elts];

    for itf in ifs.interfaces().iter().filter(|itf| itf.peer() != me) {
        let peer = itf.peer();
        let lo = me.min(peer) as u64 + 2;
        let hi = me.max(peer) as u64 + 2;
        let mid = if config.balance { itf.len() / 2 } else { 0 };
        for k in 0..itf.len() {
            // position k on the lower rank matches send_order[k] on the higher
            let p = if me < peer { k } else { itf.send_order()[k] };
            if !Interface::section_included(itf.section_of(p), periodicity, config.exclusion) {
                continue;
            }
            let mark = &mut marks[itf.local_ids()[p]];
            if k < mid {
                *mark = if *mark == 0 { lo } else { (*mark).min(lo) };
            } else {
                *mark = (*mark).max(hi);
            }
        }
    }

    // elements shared by three or more ranks may disagree after balancing
    if config.balance {
        ifs.max(1, Layout::Interleaved, config.exclusion, &mut marks)?;
    }
    ifs.tag_local_matches(config.exclusion, 1, &mut marks)?;
    Ok(marks)
}

impl<'a, C: Communicator> RangeSet<'a, C> {
    /// Number the `n_elts` local elements of an interface set.
    ///
    /// Collective over the set's communicator.
    pub fn from_interfaces(
        ifs: &'a InterfaceSet<C>,
        n_elts: usize,
        config: RangeSetConfig,
    ) -> Result<Self, NumberingError> {
        let comm = ifs.comm();
        let me = comm.rank();
        let check = ifs.check_values(n_elts, 1).and_then(|_| {
            match (config.exclusion, ifs.periodicity()) {
                (PeriodicExclusion::Rotation, Some(per)) if per.has_rotation() => {
                    Err(NumberingError::UnsupportedExclusion)
                }
                _ => Ok(()),
            }
        });
        agree(comm, ifs.ops_tag(TAG_AGREE), check)?;

        let marks = ownership_marks(ifs, n_elts, &config)?;
        let own_mark = me as u64 + 2;
        let is_owned = |mark: u64| mark == 0 || mark == own_mark;
        let n_owned = marks.iter().filter(|&&m| is_owned(m)).count() as u64;
        let start = comm.exclusive_scan_u64(ifs.ops_tag(TAG_SCAN), n_owned)?;

        // owned elements get start + 2.., others 1, then owners' ids spread
        let mut next = start + 2;
        let mut g_id: Vec<u64> = marks
            .into_iter()
            .map(|mark| {
                if is_owned(mark) {
                    next += 1;
                    next - 1
                } else {
                    1
                }
            })
            .collect();
        ifs.max(1, Layout::Interleaved, config.exclusion, &mut g_id)?;
        for g in &mut g_id {
            *g = shifted_id(*g, config.id_base)?;
        }

        let l_range = shifted_range(start, n_owned, config.id_base)?;
        log::debug!(
            "rank {me}: range set [{}, {}) over {n_elts} elements (balance {}, {:?})",
            l_range.start,
            l_range.end,
            config.balance,
            config.exclusion
        );
        Ok(Self::assemble(
            n_elts,
            l_range,
            Cow::Owned(g_id),
            Backing::Interfaces(ifs),
            config.exclusion,
        ))
    }

    /// Number owned elements by a scan; ghosts receive their owner's id.
    ///
    /// Halos cannot merge or split periodic images, so any exclusion is
    /// refused when the halo carries periodicity.
    pub fn from_halo(halo: &'a Halo<C>, config: RangeSetConfig) -> Result<Self, NumberingError> {
        if halo.periodicity().is_some() && config.exclusion != PeriodicExclusion::None {
            return Err(NumberingError::UnsupportedHaloExclusion);
        }
        let n_local = halo.n_local();
        let start = halo.comm().exclusive_scan_u64(DEFAULT_SCAN_TAG, n_local as u64)?;
        // ghosts wait on the sync, so every rank must agree before it
        let l_range = agree(
            halo.comm(),
            DEFAULT_SCAN_TAG.offset(1),
            shifted_range(start, n_local as u64, config.id_base),
        )?;
        let mut g_id = sequential_ids(l_range.start, n_local);
        g_id.resize(halo.n_elts(), 0);
        halo.sync(1, &mut g_id)?;
        Ok(Self::assemble(
            halo.n_elts(),
            l_range,
            Cow::Owned(g_id),
            Backing::Halo(halo),
            config.exclusion,
        ))
    }

    /// Every element is owned; intervals follow rank order.
    pub fn standalone(comm: &C, n_elts: usize, id_base: u64) -> Result<Self, NumberingError> {
        let start = comm.exclusive_scan_u64(DEFAULT_SCAN_TAG, n_elts as u64)?;
        let l_range = shifted_range(start, n_elts as u64, id_base)?;
        Ok(Self::assemble(
            n_elts,
            l_range.clone(),
            Cow::Owned(sequential_ids(l_range.start, n_elts)),
            Backing::Standalone,
            PeriodicExclusion::None,
        ))
    }

    /// Wrap an existing numbering without copying it.
    pub fn from_shared(
        backing: Backing<'a, C>,
        l_range: Range<u64>,
        g_id: &'a [u64],
        exclusion: PeriodicExclusion,
    ) -> Result<Self, NumberingError> {
        let n_elts = g_id.len();
        match backing {
            Backing::Interfaces(ifs) => {
                ifs.check_values(n_elts, 1)?;
            }
            Backing::Halo(halo) if halo.n_elts() != n_elts => {
                return Err(NumberingError::LengthMismatch {
                    what: "halo global ids",
                    expected: halo.n_elts(),
                    got: n_elts,
                });
            }
            _ => {}
        }
        Ok(Self::assemble(n_elts, l_range, Cow::Borrowed(g_id), backing, exclusion))
    }

    fn assemble(
        n_elts: usize,
        l_range: Range<u64>,
        g_id: Cow<'a, [u64]>,
        backing: Backing<'a, C>,
        exclusion: PeriodicExclusion,
    ) -> Self {
        let n_leading = leading_run(&l_range, &g_id);
        Self {
            n_elts,
            n_leading,
            l_range,
            g_id,
            backing,
            exclusion,
        }
    }

    pub fn n_elts(&self) -> usize {
        self.n_elts
    }

    /// Size of the owned interval.
    pub fn n_owned(&self) -> usize {
        (self.l_range.end.saturating_sub(self.l_range.start)) as usize
    }

    /// Length of the leading run of elements whose id is `start + index`.
    pub fn n_leading(&self) -> usize {
        self.n_leading
    }

    /// Owned global id interval `[start, end)`.
    pub fn l_range(&self) -> Range<u64> {
        self.l_range.clone()
    }

    pub fn g_ids(&self) -> &[u64] {
        &self.g_id
    }

    pub fn backing(&self) -> Backing<'a, C> {
        self.backing
    }

    pub fn exclusion(&self) -> PeriodicExclusion {
        self.exclusion
    }

    /// `true` if the id of element `i` lies in the owned interval.
    pub fn is_in_range(&self, i: usize) -> bool {
        self.g_id
            .get(i)
            .is_some_and(|g| self.l_range.contains(g))
    }

    /// Take ownership of the global ids.
    pub fn into_g_ids(self) -> Vec<u64> {
        self.g_id.into_owned()
    }

    fn check_len(&self, what: &'static str, len: usize, expected: usize) -> Result<(), NumberingError> {
        if len == expected {
            Ok(())
        } else {
            Err(NumberingError::LengthMismatch { what, expected, got: len })
        }
    }

    /// Slot of element `i` in the compacted owned array, if owned.
    fn slot(&self, i: usize) -> Option<usize> {
        let g = self.g_id[i];
        self.l_range
            .contains(&g)
            .then(|| (g - self.l_range.start) as usize)
    }

    /// Zero the values of elements whose id is outside the owned interval.
    pub fn zero_out_of_range<T: Element>(
        &self,
        stride: usize,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.check_len("range-set values", values.len(), self.n_elts * stride)?;
        if stride == 0 {
            return Ok(());
        }
        let l_range = &self.l_range;
        match self.backing {
            Backing::Interfaces(ifs) => {
                for itf in ifs.interfaces() {
                    for &k in itf.local_ids() {
                        if !l_range.contains(&self.g_id[k]) {
                            values[k * stride..(k + 1) * stride].fill(T::zero());
                        }
                    }
                }
            }
            // ghosts are never owned, periodic ones included
            Backing::Halo(halo) => values[halo.n_local() * stride..].fill(T::zero()),
            Backing::Standalone => {
                let g_id: &[u64] = &self.g_id;
                #[cfg(feature = "rayon")]
                values
                    .par_chunks_mut(stride)
                    .zip(g_id.par_iter())
                    .for_each(|(chunk, g)| {
                        if !l_range.contains(g) {
                            chunk.fill(T::zero());
                        }
                    });
                #[cfg(not(feature = "rayon"))]
                values
                    .chunks_mut(stride)
                    .zip(g_id.iter())
                    .for_each(|(chunk, g)| {
                        if !l_range.contains(g) {
                            chunk.fill(T::zero());
                        }
                    });
            }
        }
        Ok(())
    }

    /// Give every copy of every element its owner's value.
    ///
    /// With an interface set, non-owned copies and non-canonical same-rank
    /// periodic copies are zeroed before summing; with a halo, ghosts are
    /// overwritten.
    pub fn sync<T: Element>(&self, stride: usize, values: &mut [T]) -> Result<(), NumberingError> {
        match self.backing {
            Backing::Interfaces(ifs) => {
                self.zero_out_of_range(stride, values)?;
                for k in ifs.same_rank_duplicates(self.exclusion) {
                    values[k * stride..(k + 1) * stride].fill(T::zero());
                }
                ifs.sum(stride, Layout::Interleaved, self.exclusion, values)
            }
            Backing::Halo(halo) => {
                self.check_len("range-set values", values.len(), self.n_elts * stride)?;
                halo.sync(stride, values)
            }
            Backing::Standalone => {
                self.check_len("range-set values", values.len(), self.n_elts * stride)
            }
        }
    }

    /// Compact the owned values into `[0, n_owned)` order.
    ///
    /// When several local copies share an owned slot, the lowest index wins.
    pub fn gather<T: Element>(&self, stride: usize, src: &[T]) -> Result<Vec<T>, NumberingError> {
        self.check_len("range-set values", src.len(), self.n_elts * stride)?;
        let mut dest = vec![T::zero(); self.n_owned() * stride];
        for i in (0..self.n_elts).rev() {
            if let Some(j) = self.slot(i) {
                dest[j * stride..(j + 1) * stride].copy_from_slice(&src[i * stride..(i + 1) * stride]);
            }
        }
        Ok(dest)
    }

    /// [`gather`](Self::gather) within `values`: on return the first
    /// `n_owned * stride` values hold the compacted array.
    pub fn gather_in_place<T: Element>(
        &self,
        stride: usize,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.check_len("range-set values", values.len(), self.n_elts * stride)?;
        self.check_in_place_order("gather_in_place")?;
        let lb = self.n_leading;
        let mut written = vec![false; self.n_owned()];
        written.iter_mut().take(lb).for_each(|w| *w = true);
        for i in lb..self.n_elts {
            let Some(j) = self.slot(i) else { continue };
            if !written[j] {
                values.copy_within(i * stride..(i + 1) * stride, j * stride);
                written[j] = true;
            }
        }
        Ok(())
    }

    /// Expand a compacted owned array to every element, then [`sync`](Self::sync).
    pub fn scatter<T: Element>(&self, stride: usize, src: &[T]) -> Result<Vec<T>, NumberingError> {
        self.check_len("compacted values", src.len(), self.n_owned() * stride)?;
        let mut dest = vec![T::zero(); self.n_elts * stride];
        for i in 0..self.n_elts {
            if let Some(j) = self.slot(i) {
                dest[i * stride..(i + 1) * stride].copy_from_slice(&src[j * stride..(j + 1) * stride]);
            }
        }
        self.sync(stride, &mut dest)?;
        Ok(dest)
    }

    /// [`scatter`](Self::scatter) within `values`, whose first
    /// `n_owned * stride` values hold the compacted array.
    pub fn scatter_in_place<T: Element>(
        &self,
        stride: usize,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.check_len("range-set values", values.len(), self.n_elts * stride)?;
        self.check_in_place_order("scatter_in_place")?;
        for i in (self.n_leading..self.n_elts).rev() {
            if let Some(j) = self.slot(i) {
                values.copy_within(j * stride..(j + 1) * stride, i * stride);
            }
        }
        self.sync(stride, values)
    }

    /// In-place compaction needs every owned slot at or below its element.
    fn check_in_place_order(&self, op: &'static str) -> Result<(), NumberingError> {
        let forward = (self.n_leading..self.n_elts)
            .find_map(|i| self.slot(i).filter(|&j| j > i).map(|j| (i, j)));
        match forward {
            Some((index, slot)) => {
                log::error!("{op}: element {index} maps to owned slot {slot}");
                Err(NumberingError::InPlaceOrder { op, index, slot })
            }
            None => Ok(()),
        }
    }

    pub fn zero_out_of_range_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_element_type!(datatype, "zero_out_of_range", T => {
            self.zero_out_of_range::<T>(stride, bytes_as_mut::<T>(values)?)
        })
    }

    pub fn sync_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_element_type!(datatype, "sync", T => {
            self.sync::<T>(stride, bytes_as_mut::<T>(values)?)
        })
    }

    pub fn gather_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        src: &[u8],
    ) -> Result<Vec<u8>, NumberingError> {
        with_element_type!(datatype, "gather", T => {
            let dest = self.gather::<T>(stride, bytes_as::<T>(src)?)?;
            Ok(bytemuck::cast_slice::<T, u8>(dest.as_slice()).to_vec())
        })
    }

    pub fn scatter_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        src: &[u8],
    ) -> Result<Vec<u8>, NumberingError> {
        with_element_type!(datatype, "scatter", T => {
            let dest = self.scatter::<T>(stride, bytes_as::<T>(src)?)?;
            Ok(bytemuck::cast_slice::<T, u8>(dest.as_slice()).to_vec())
        })
    }
}

impl<C: Communicator> fmt::Debug for RangeSet<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeSet")
            .field("n_elts", &self.n_elts)
            .field("n_leading", &self.n_leading)
            .field("l_range", &self.l_range)
            .field("backing", &self.backing)
            .field("exclusion", &self.exclusion)
            .finish()
    }
}

impl<C: Communicator> fmt::Display for RangeSet<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "range set: {} elements, owned [{}, {}) ({} leading), {:?}",
            self.n_elts, self.l_range.start, self.l_range.end, self.n_leading, self.backing
        )?;
        for (i, g) in self.g_id.iter().enumerate() {
            let owned = if self.l_range.contains(g) { "" } else { " (ghost)" };
            writeln!(f, "  {i:>8} : {g:>12}{owned}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::halo::HaloPeer;
    use crate::interface::Match;
    use crate::topology::periodicity::Periodicity;

    /// Elements 1 and 3 are translation images on a single rank.
    fn periodic_pair() -> InterfaceSet<NoComm> {
        let mut per = Periodicity::new();
        per.add_translation(1).unwrap();
        let entries = vec![
            Match { section: 1, local: 1, peer_local: 3 },
            Match { section: 2, local: 3, peer_local: 1 },
        ];
        let (itf, _) = Interface::from_matches(0, 3, entries, Some(&per)).unwrap();
        InterfaceSet::from_interfaces(NoComm, vec![itf], Some(Arc::new(per)))
    }

    #[test]
    fn periodic_images_share_an_id() {
        let ifs = periodic_pair();
        let rs = RangeSet::from_interfaces(&ifs, 4, RangeSetConfig::default()).unwrap();
        assert_eq!(rs.l_range(), 0..3);
        assert_eq!(rs.g_ids(), &[0, 1, 2, 1]);
        assert_eq!(rs.n_leading(), 3);
    }

    #[test]
    fn excluded_images_keep_distinct_ids() {
        let ifs = periodic_pair();
        let config = RangeSetConfig {
            exclusion: PeriodicExclusion::All,
            id_base: 10,
            ..Default::default()
        };
        let rs = RangeSet::from_interfaces(&ifs, 4, config).unwrap();
        assert_eq!(rs.l_range(), 10..14);
        assert_eq!(rs.g_ids(), &[10, 11, 12, 13]);
    }

    #[test]
    fn rotation_exclusion_with_rotations_is_refused() {
        let mut per = Periodicity::new();
        per.add_rotation(1).unwrap();
        let ifs = InterfaceSet::from_interfaces(NoComm, vec![], Some(Arc::new(per)));
        let config = RangeSetConfig {
            exclusion: PeriodicExclusion::Rotation,
            ..Default::default()
        };
        assert_eq!(
            RangeSet::from_interfaces(&ifs, 2, config).unwrap_err(),
            NumberingError::UnsupportedExclusion
        );
    }

    #[test]
    fn sync_gather_scatter_on_periodic_pair() {
        let ifs = periodic_pair();
        let rs = RangeSet::from_interfaces(&ifs, 4, RangeSetConfig::default()).unwrap();
        let x = vec![1.0f64, 2.0, 3.0, 4.0];

        let mut synced = x.clone();
        rs.sync(1, &mut synced).unwrap();
        assert_eq!(synced, vec![1.0, 2.0, 3.0, 2.0]);

        let gathered = rs.gather(1, &x).unwrap();
        assert_eq!(gathered, vec![1.0, 2.0, 3.0]);
        assert_eq!(rs.scatter(1, &gathered).unwrap(), synced);

        let mut in_place = x.clone();
        rs.gather_in_place(1, &mut in_place).unwrap();
        assert_eq!(&in_place[..3], &gathered[..]);
        rs.scatter_in_place(1, &mut in_place).unwrap();
        assert_eq!(in_place, synced);
    }

    #[test]
    fn in_place_gather_compacts_after_duplicates() {
        // elements 0 and 1 are images; 2 and 3 follow
        let mut per = Periodicity::new();
        per.add_translation(1).unwrap();
        let entries = vec![
            Match { section: 1, local: 0, peer_local: 1 },
            Match { section: 2, local: 1, peer_local: 0 },
        ];
        let (itf, _) = Interface::from_matches(0, 3, entries, Some(&per)).unwrap();
        let ifs = InterfaceSet::from_interfaces(NoComm, vec![itf], Some(Arc::new(per)));
        let rs = RangeSet::from_interfaces(&ifs, 4, RangeSetConfig::default()).unwrap();
        assert_eq!(rs.g_ids(), &[0, 0, 1, 2]);
        assert_eq!(rs.n_leading(), 1);

        let mut values = vec![5u32, 6, 7, 8];
        rs.gather_in_place(1, &mut values).unwrap();
        assert_eq!(&values[..3], &[5, 7, 8]);
        rs.scatter_in_place(1, &mut values).unwrap();
        assert_eq!(values, vec![5, 5, 7, 8]);
    }

    #[test]
    fn standalone_single_rank() {
        let rs = RangeSet::standalone(&NoComm, 3, 1).unwrap();
        assert_eq!(rs.l_range(), 1..4);
        assert_eq!(rs.g_ids(), &[1, 2, 3]);
        assert_eq!(rs.n_owned(), 3);
        let mut values = vec![1i64, 2, 3];
        rs.sync(1, &mut values).unwrap();
        rs.zero_out_of_range(1, &mut values).unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn halo_with_periodic_ghost() {
        let halo = Halo::new(
            NoComm,
            2,
            vec![HaloPeer {
                rank: 0,
                send_ids: vec![0],
                ghost_start: 2,
                ghost_len: 1,
            }],
        )
        .unwrap()
        .with_periodicity(Arc::new(Periodicity::new()));
        let rs = RangeSet::from_halo(&halo, RangeSetConfig::default()).unwrap();
        assert_eq!(rs.l_range(), 0..2);
        assert_eq!(rs.g_ids(), &[0, 1, 0]);

        let mut values = vec![4.0f32, 5.0, 0.5];
        rs.zero_out_of_range(1, &mut values).unwrap();
        assert_eq!(values, vec![4.0, 5.0, 0.0]);
        let scattered = rs.scatter(1, &[4.0f32, 5.0]).unwrap();
        assert_eq!(scattered, vec![4.0, 5.0, 4.0]);

        let config = RangeSetConfig {
            exclusion: PeriodicExclusion::All,
            ..Default::default()
        };
        assert_eq!(
            RangeSet::from_halo(&halo, config).unwrap_err(),
            NumberingError::UnsupportedHaloExclusion
        );
    }

    #[test]
    fn shared_ids_are_borrowed() {
        let g_id = vec![3u64, 4, 9];
        let rs = RangeSet::<NoComm>::from_shared(Backing::Standalone, 3..5, &g_id, PeriodicExclusion::None)
            .unwrap();
        assert_eq!(rs.n_leading(), 2);
        assert!(rs.is_in_range(1));
        assert!(!rs.is_in_range(2));
        assert_eq!(rs.gather(1, &[1u16, 2, 3]).unwrap(), vec![1, 2]);
        assert!(matches!(rs.g_id, Cow::Borrowed(_)));
    }

    #[test]
    fn in_place_refuses_forward_slots() {
        // element 0 owns the second slot, element 1 the first
        let g_id = vec![4u64, 3];
        let rs = RangeSet::<NoComm>::from_shared(Backing::Standalone, 3..5, &g_id, PeriodicExclusion::None)
            .unwrap();
        assert_eq!(rs.gather(1, &[7u16, 8]).unwrap(), vec![8, 7]);

        let mut values = vec![7u16, 8];
        assert_eq!(
            rs.gather_in_place(1, &mut values).unwrap_err(),
            NumberingError::InPlaceOrder { op: "gather_in_place", index: 0, slot: 1 }
        );
        assert_eq!(
            rs.scatter_in_place(1, &mut values).unwrap_err(),
            NumberingError::InPlaceOrder { op: "scatter_in_place", index: 0, slot: 1 }
        );
        assert_eq!(values, vec![7, 8]);
    }

    #[test]
    fn id_base_overflow_is_reported() {
        let near_max = u64::MAX - 1;
        assert_eq!(
            RangeSet::standalone(&NoComm, 3, near_max).unwrap_err(),
            NumberingError::IdOverflow { id_base: near_max }
        );
        assert_eq!(RangeSet::standalone(&NoComm, 1, near_max).unwrap().g_ids(), &[near_max]);

        let ifs = periodic_pair();
        let config = |id_base| RangeSetConfig { id_base, ..Default::default() };
        assert_eq!(
            RangeSet::from_interfaces(&ifs, 4, config(u64::MAX - 2)).unwrap_err(),
            NumberingError::IdOverflow { id_base: u64::MAX - 2 }
        );
        let base = u64::MAX - 3;
        let rs = RangeSet::from_interfaces(&ifs, 4, config(base)).unwrap();
        assert_eq!(rs.l_range(), base..u64::MAX);
        assert_eq!(rs.g_ids(), &[base, base + 1, base + 2, base + 1]);

        let halo = Halo::new(NoComm, 2, vec![]).unwrap();
        assert_eq!(
            RangeSet::from_halo(&halo, config(u64::MAX)).unwrap_err(),
            NumberingError::IdOverflow { id_base: u64::MAX }
        );
    }

    #[test]
    fn untyped_operations_dispatch() {
        let ifs = periodic_pair();
        let rs = RangeSet::from_interfaces(&ifs, 4, RangeSetConfig::default()).unwrap();
        let mut values = vec![1i32, 2, 3, 4];
        rs.sync_untyped(Datatype::Int32, 1, bytemuck::cast_slice_mut(&mut values))
            .unwrap();
        assert_eq!(values, vec![1, 2, 3, 2]);
        let err = rs
            .gather_untyped(Datatype::Null, 1, &[])
            .unwrap_err();
        assert!(matches!(err, NumberingError::UnsupportedDatatype { op: "gather", .. }));
    }

    #[test]
    fn config_defaults_and_serde() {
        let config: RangeSetConfig = serde_json::from_str(r#"{"balance": true}"#).unwrap();
        assert!(config.balance);
        assert_eq!(config.exclusion, PeriodicExclusion::None);
        assert_eq!(config.id_base, 0);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<RangeSetConfig>(&json).unwrap(), config);
    }
}
