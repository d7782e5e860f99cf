//! Structural transformations of an [`InterfaceSet`]: element renumbering
//! and derived sets for strided or blocked arrays.

use crate::algs::all_to_all::agree;
use crate::algs::communicator::Communicator;
use crate::interface::{Interface, InterfaceSet, Match};
use crate::numbering_error::NumberingError;

// offsets from the set's tag base
const TAG_RENUMBER: u16 = 3;
const TAG_AGREE: u16 = 4;
const TAG_BLOCKS: u16 = 5;
const TAG_PEER_IDS: u16 = 6;

impl<C: Communicator> InterfaceSet<C> {
    fn n_sections_total(&self) -> usize {
        self.periodicity().map_or(1, |per| per.n_transforms() + 1)
    }

    /// Rebuild every interface from `(section, local, peer_local)` entries;
    /// interfaces left empty are dropped.
    fn rebuild_from<F>(&self, mut entries_of: F) -> Result<Vec<Interface>, NumberingError>
    where
        F: FnMut(usize, &Interface) -> Vec<Match>,
    {
        let n_sections = self.n_sections_total();
        let mut rebuilt = Vec::with_capacity(self.interfaces.len());
        for (i, itf) in self.interfaces.iter().enumerate() {
            let entries = entries_of(i, itf);
            if entries.is_empty() {
                continue;
            }
            let (itf, _) = Interface::from_matches(itf.peer, n_sections, entries, self.periodicity())?;
            rebuilt.push(itf);
        }
        Ok(rebuilt)
    }

    /// Apply an old-to-new element map (`None` removes the element).
    ///
    /// Pairs where either side was removed disappear; interfaces left empty
    /// are dropped. Collective over the whole communicator. Refused while
    /// match ids are materialized.
    pub fn renumber(&mut self, old_to_new: &[Option<usize>]) -> Result<(), NumberingError> {
        let refs = self.match_id_refs();
        let check = if refs > 0 {
            Err(NumberingError::MatchIdsInUse { refs })
        } else {
            match self
                .interfaces
                .iter()
                .flat_map(|itf| itf.local_ids.iter().copied())
                .find(|&id| id >= old_to_new.len())
            {
                Some(index) => Err(NumberingError::ElementOutOfRange {
                    index,
                    n_elts: old_to_new.len(),
                }),
                None => Ok(()),
            }
        };
        agree(self.comm(), self.ops_tag(TAG_AGREE), check)?;

        let peer_new = self.exchange_in_send_order::<u64, _>(
            self.ops_tag(TAG_RENUMBER),
            1,
            |_, itf, p, out| {
                out[0] = old_to_new[itf.local_ids[p]].map_or(u64::MAX, |id| id as u64);
            },
        )?;

        let n_before = self.n_elts_total();
        let rebuilt = self.rebuild_from(|i, itf| {
            (0..itf.n_sections())
                .flat_map(|s| itf.section(s).map(move |p| (s, p)))
                .filter_map(|(s, p)| {
                    let local = old_to_new[itf.local_ids[p]]?;
                    let peer = peer_new[i][p];
                    (peer != u64::MAX).then_some(Match {
                        section: s,
                        local,
                        peer_local: peer as usize,
                    })
                })
                .collect()
        })?;
        self.interfaces = rebuilt;
        log::debug!(
            "rank {}: renumbered interfaces, {} -> {} entries",
            self.local_rank(),
            n_before,
            self.n_elts_total()
        );
        Ok(())
    }

    /// Interface set for arrays of `stride` values per element: element `e`
    /// becomes entries `e * stride .. e * stride + stride`.
    pub fn dup_strided(&self, stride: usize) -> Result<InterfaceSet<C>, NumberingError>
    where
        C: Clone,
    {
        if stride == 0 {
            return Err(NumberingError::LengthMismatch {
                what: "value stride",
                expected: 1,
                got: 0,
            });
        }
        let interfaces = self
            .interfaces
            .iter()
            .map(|itf| Interface {
                peer: itf.peer,
                local_ids: itf
                    .local_ids
                    .iter()
                    .flat_map(|&e| (0..stride).map(move |j| e * stride + j))
                    .collect(),
                transform_index: itf
                    .transform_index
                    .as_ref()
                    .map(|idx| idx.iter().map(|&start| start * stride).collect()),
                send_order: itf
                    .send_order
                    .iter()
                    .flat_map(|&p| (0..stride).map(move |j| p * stride + j))
                    .collect(),
            })
            .collect();
        Ok(InterfaceSet::from_interfaces(self.comm().clone(), interfaces, self.periodicity_arc())
            .with_tag(self.tag()))
    }

    /// Interface set for arrays of `n_blocks` consecutive blocks of
    /// `block_size` entries: entry `e` of block `b` is `e + b * block_size`.
    ///
    /// Block sizes may differ between ranks. Collective over the whole
    /// communicator.
    pub fn dup_blocks(
        &self,
        block_size: usize,
        n_blocks: usize,
    ) -> Result<InterfaceSet<C>, NumberingError>
    where
        C: Clone,
    {
        let check = self.check_values(block_size, 1).map(|_| ());
        agree(self.comm(), self.ops_tag(TAG_AGREE), check)?;

        let block_sizes = self
            .comm()
            .allgather_u64(self.ops_tag(TAG_BLOCKS), block_size as u64)?;
        let peer_ids = self.exchange_in_send_order::<u64, _>(
            self.ops_tag(TAG_PEER_IDS),
            1,
            |_, itf, p, out| out[0] = itf.local_ids[p] as u64,
        )?;

        let interfaces = self.rebuild_from(|i, itf| {
            let peer_block = block_sizes[itf.peer] as usize;
            let mut entries = Vec::with_capacity(itf.len() * n_blocks);
            for b in 0..n_blocks {
                for s in 0..itf.n_sections() {
                    entries.extend(itf.section(s).map(|p| Match {
                        section: s,
                        local: itf.local_ids[p] + b * block_size,
                        peer_local: peer_ids[i][p] as usize + b * peer_block,
                    }));
                }
            }
            entries
        })?;
        Ok(InterfaceSet::from_interfaces(self.comm().clone(), interfaces, self.periodicity_arc())
            .with_tag(self.tag()))
    }
}
