//! Bulk operations over an [`InterfaceSet`].
//!
//! Every operation packs values in each interface's `send_order`, exchanges
//! one buffer per peer and combines what comes back position by position.
//! Reductions combine each copy's own value with the *original* values of
//! all other copies, so the result does not depend on the order in which
//! peers answer.

use crate::algs::communicator::{CommTag, Communicator};
use crate::data::datatype::{
    BitElement, BitOrOp, Datatype, Element, Layout, MaxOp, MinOp, Reducer, SumOp, bytes_as,
    bytes_as_mut, with_element_type, with_integer_type,
};
use crate::interface::InterfaceSet;
use crate::numbering_error::NumberingError;
use crate::topology::periodicity::PeriodicExclusion;

// offsets from the set's tag base; 0 is taken by match ids
const TAG_COPY: u16 = 1;
const TAG_REDUCE: u16 = 2;

impl<C: Communicator> InterfaceSet<C> {
    /// Number of elements described by `len` values of `stride` each, checked
    /// against the highest local id referenced by the interfaces.
    pub(crate) fn check_values(&self, len: usize, stride: usize) -> Result<usize, NumberingError> {
        if stride == 0 {
            return Err(NumberingError::LengthMismatch {
                what: "value stride",
                expected: 1,
                got: 0,
            });
        }
        if len % stride != 0 {
            return Err(NumberingError::LengthMismatch {
                what: "strided values",
                expected: len - len % stride,
                got: len,
            });
        }
        let n_elts = len / stride;
        let max_id = self
            .interfaces
            .iter()
            .flat_map(|itf| itf.local_ids.iter().copied())
            .max();
        match max_id {
            Some(index) if index >= n_elts => Err(NumberingError::ElementOutOfRange { index, n_elts }),
            _ => Ok(n_elts),
        }
    }

    /// Values of the matching peer elements, in interface order.
    ///
    /// With `src_on_parent`, `src` holds `stride` values per local element;
    /// otherwise it is already laid out in interface order (interfaces
    /// concatenated, `stride` values per entry). The result always has
    /// `n_elts_total() * stride` values.
    pub fn copy_array<T: Element>(
        &self,
        stride: usize,
        src: &[T],
        src_on_parent: bool,
    ) -> Result<Vec<T>, NumberingError> {
        if src_on_parent {
            self.check_values(src.len(), stride)?;
        } else if src.len() != self.n_elts_total() * stride {
            return Err(NumberingError::LengthMismatch {
                what: "interface-ordered values",
                expected: self.n_elts_total() * stride,
                got: src.len(),
            });
        }

        let offsets: Vec<usize> = self
            .interfaces
            .iter()
            .scan(0, |acc, itf| {
                let start = *acc;
                *acc += itf.len();
                Some(start)
            })
            .collect();

        let received = self.exchange_in_send_order::<T, _>(
            self.tag.offset(TAG_COPY),
            stride,
            |i, itf, p, out| {
                let start = if src_on_parent {
                    itf.local_ids[p] * stride
                } else {
                    (offsets[i] + p) * stride
                };
                out.copy_from_slice(&src[start..start + stride]);
            },
        )?;
        Ok(received.concat())
    }

    /// Byte-level [`copy_array`](Self::copy_array).
    pub fn copy_array_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        src: &[u8],
        src_on_parent: bool,
    ) -> Result<Vec<u8>, NumberingError> {
        with_element_type!(datatype, "copy_array", T => {
            let copied = self.copy_array::<T>(stride, bytes_as::<T>(src)?, src_on_parent)?;
            Ok(bytemuck::cast_slice::<T, u8>(copied.as_slice()).to_vec())
        })
    }

    /// Combine every copy of every shared element with `op`.
    ///
    /// Sections whose transform is excluded are exchanged but not combined;
    /// a section and its reverse share a classification, so both sides skip
    /// the same pairs.
    pub(crate) fn reduce<T, R>(
        &self,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [T],
        op: R,
    ) -> Result<(), NumberingError>
    where
        T: Element,
        R: Reducer<T>,
    {
        if self.interfaces.is_empty() {
            return Ok(());
        }
        let n_elts = self.check_values(values.len(), stride)?;

        let received = {
            let snapshot: &[T] = values;
            self.exchange_in_send_order::<T, _>(
                self.tag.offset(TAG_REDUCE),
                stride,
                |_, itf, p, out| {
                    let elt = itf.local_ids[p];
                    for (l, o) in out.iter_mut().enumerate() {
                        *o = snapshot[layout.index(elt, l, stride, n_elts)];
                    }
                },
            )?
        };

        let periodicity = self.periodicity();
        for (itf, peer_values) in self.interfaces.iter().zip(&received) {
            for range in itf.included_sections(periodicity, exclusion) {
                for p in range {
                    let elt = itf.local_ids[p];
                    for l in 0..stride {
                        let idx = layout.index(elt, l, stride, n_elts);
                        values[idx] = op.combine(values[idx], peer_values[p * stride + l]);
                    }
                }
            }
        }
        log::trace!(
            "rank {}: {} over {} interfaces (stride {stride}, {exclusion:?})",
            self.local_rank(),
            R::NAME,
            self.len()
        );
        Ok(())
    }

    /// Sum of all copies of every shared element.
    pub fn sum<T: Element>(
        &self,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.reduce(stride, layout, exclusion, values, SumOp)
    }

    /// Minimum over all copies of every shared element.
    pub fn min<T: Element>(
        &self,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.reduce(stride, layout, exclusion, values, MinOp)
    }

    /// Maximum over all copies of every shared element.
    pub fn max<T: Element>(
        &self,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.reduce(stride, layout, exclusion, values, MaxOp)
    }

    /// Bitwise-or over all copies of every shared element.
    pub fn inclusive_or<T: BitElement>(
        &self,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [T],
    ) -> Result<(), NumberingError> {
        self.reduce(stride, layout, exclusion, values, BitOrOp)
    }

    pub fn sum_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_element_type!(datatype, "sum", T => {
            self.sum::<T>(stride, layout, exclusion, bytes_as_mut::<T>(values)?)
        })
    }

    pub fn min_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_element_type!(datatype, "min", T => {
            self.min::<T>(stride, layout, exclusion, bytes_as_mut::<T>(values)?)
        })
    }

    pub fn max_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_element_type!(datatype, "max", T => {
            self.max::<T>(stride, layout, exclusion, bytes_as_mut::<T>(values)?)
        })
    }

    /// Integer types only; floating-point data is rejected.
    pub fn inclusive_or_untyped(
        &self,
        datatype: Datatype,
        stride: usize,
        layout: Layout,
        exclusion: PeriodicExclusion,
        values: &mut [u8],
    ) -> Result<(), NumberingError> {
        with_integer_type!(datatype, "inclusive_or", T => {
            self.inclusive_or::<T>(stride, layout, exclusion, bytes_as_mut::<T>(values)?)
        })
    }

    /// Higher local index of every same-rank periodic pair whose transform
    /// survives `exclusion`, sorted and deduplicated.
    ///
    /// The lower index of a pair is the canonical copy.
    pub fn same_rank_duplicates(&self, exclusion: PeriodicExclusion) -> Vec<usize> {
        let (Some(itf), Some(per)) = (self.same_rank_interface(), self.periodicity()) else {
            return Vec::new();
        };
        let mut duplicates: Vec<usize> = (1..itf.n_sections())
            .filter(|&s| !exclusion.excludes(per.kind(s - 1)))
            .flat_map(|s| itf.section(s))
            .map(|p| itf.local_ids[p].max(itf.local_match(p)))
            .collect();
        duplicates.sort_unstable();
        duplicates.dedup();
        duplicates
    }

    /// Write `value` into `tags` at every non-canonical same-rank periodic
    /// copy.
    pub fn tag_local_matches<T: Copy>(
        &self,
        exclusion: PeriodicExclusion,
        value: T,
        tags: &mut [T],
    ) -> Result<(), NumberingError> {
        let n_elts = tags.len();
        for k in self.same_rank_duplicates(exclusion) {
            let slot = tags
                .get_mut(k)
                .ok_or(NumberingError::ElementOutOfRange { index: k, n_elts })?;
            *slot = value;
        }
        Ok(())
    }

    /// Tag used by range-set exchanges built on this set.
    pub(crate) fn ops_tag(&self, k: u16) -> CommTag {
        self.tag.offset(k)
    }
}
