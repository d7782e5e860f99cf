//! Distributed discovery of shared elements.
//!
//! Every element is sent, as `(global_number, local_index)`, to the
//! rendezvous owner of its global number under a block partition. Owners
//! sort what they receive; equal numbers form equivalence groups. Declared
//! periodic couples travel the same way, are closed under composition level
//! by level, and their copies are folded into the groups of their images.
//! Finally each owner tells every holder which `(rank, local, section)`
//! copies its elements have, and holders assemble their interfaces.

use std::sync::Arc;

use itertools::Itertools;

use crate::algs::all_to_all::{agree, exchange_records};
use crate::algs::block_dist::BlockDistribution;
use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::wire::{WireCouple, WireElement, WireMatch, WirePeriodicCopy};
use crate::interface::{DEFAULT_OPS_TAG, Interface, InterfaceSet, Match};
use crate::numbering_error::NumberingError;
use crate::topology::periodicity::Periodicity;

/// Default tag base of the build exchanges.
pub const DEFAULT_BUILD_TAG: CommTag = CommTag::new(0x4E00);

// offsets from the build tag base
const TAG_MAX: u16 = 0;
const TAG_AGREE: u16 = 1;
const TAG_ELEMENTS: u16 = 2; // + 3
const TAG_COUPLES: u16 = 4; // + 5
const TAG_CLOSURE: u16 = 6; // + 7
const TAG_CLOSURE_COUNT: u16 = 8;
const TAG_COPIES: u16 = 9; // + 10
const TAG_MATCHES: u16 = 11; // + 12

/// Couples `(a, b)` of global numbers where `b` is the image of `a` by the
/// direct transform of periodicity `periodicity_num`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeriodicCouples {
    pub periodicity_num: usize,
    pub couples: Vec<(u64, u64)>,
}

/// Element copy held by the rendezvous owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct BlockEntry {
    gnum: u64,
    rank: usize,
    local: usize,
}

/// Periodic copy merged into the group of `gnum`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PeriodicMember {
    gnum: u64,
    rank: usize,
    local: usize,
    section: usize,
}

/// `(num_1, num_2, transform)`: `num_2` is the image of `num_1`.
type Couple = (u64, u64, usize);

fn run_of<T>(sorted: &[T], gnum: u64, key: impl Fn(&T) -> u64) -> &[T] {
    let start = sorted.partition_point(|e| key(e) < gnum);
    let end = sorted.partition_point(|e| key(e) <= gnum);
    &sorted[start..end]
}

fn empty_buffers<T>(n_ranks: usize) -> Vec<Vec<T>> {
    (0..n_ranks).map(|_| Vec::new()).collect()
}

/// Configures and runs the interface discovery.
#[derive(Clone, Debug)]
pub struct InterfaceSetBuilder {
    periodicity: Option<Arc<Periodicity>>,
    couples: Vec<PeriodicCouples>,
    tag: CommTag,
    ops_tag: CommTag,
}

impl Default for InterfaceSetBuilder {
    fn default() -> Self {
        Self {
            periodicity: None,
            couples: Vec::new(),
            tag: DEFAULT_BUILD_TAG,
            ops_tag: DEFAULT_OPS_TAG,
        }
    }
}

impl InterfaceSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a periodicity descriptor with the resulting set.
    pub fn periodicity(mut self, periodicity: Arc<Periodicity>) -> Self {
        self.periodicity = Some(periodicity);
        self
    }

    /// Declare periodic couples for base periodicity `periodicity_num`.
    pub fn periodic_couples(mut self, periodicity_num: usize, couples: Vec<(u64, u64)>) -> Self {
        self.couples.push(PeriodicCouples {
            periodicity_num,
            couples,
        });
        self
    }

    /// Tag bases for the build exchanges and for later bulk operations.
    pub fn tags(mut self, build: CommTag, ops: CommTag) -> Self {
        self.tag = build;
        self.ops_tag = ops;
        self
    }

    /// Discover shared elements among all ranks of `comm`.
    ///
    /// Collective. Returns `None` on a single process without periodicity.
    pub fn build<C>(
        &self,
        comm: &C,
        global_numbers: &[u64],
    ) -> Result<Option<InterfaceSet<C>>, NumberingError>
    where
        C: Communicator + Clone,
    {
        if comm.size() == 1 && self.periodicity.is_none() {
            log::debug!("single process without periodicity: no interface set");
            return Ok(None);
        }
        let n_ranks = comm.size();
        let periodicity = self.periodicity.as_deref();

        let local_couples = agree(comm, self.tag.offset(TAG_AGREE), self.resolve_couples())?;

        let local_max = global_numbers.iter().copied().max().unwrap_or(0);
        let dist = BlockDistribution::new(comm, self.tag.offset(TAG_MAX), local_max)?;

        // 1) elements to their rendezvous owners
        let mut send = empty_buffers(n_ranks);
        for (local, &gnum) in global_numbers.iter().enumerate() {
            send[dist.owner_of(gnum)].push(WireElement::new(gnum, local));
        }
        let received = exchange_records(
            comm,
            ExchangeTags::from_base(self.tag.offset(TAG_ELEMENTS)),
            send,
        )?;
        let mut block: Vec<BlockEntry> = received
            .into_iter()
            .enumerate()
            .flat_map(|(rank, records)| {
                records.into_iter().map(move |w| BlockEntry {
                    gnum: w.gnum(),
                    rank,
                    local: w.local(),
                })
            })
            .collect();
        block.sort_unstable();

        // 2) periodic copies folded into the groups of their images
        let members = match periodicity {
            Some(per) => self.periodic_members(comm, &dist, per, &block, local_couples)?,
            None => Vec::new(),
        };

        // 3) ship every group back to its holders
        let mut send = empty_buffers(n_ranks);
        let mut n_groups = 0usize;
        let mut n_local_duplicates = 0usize;
        for run in block.chunk_by(|a, b| a.gnum == b.gnum) {
            let images = run_of(&members, run[0].gnum, |m| m.gnum);
            if run.len() < 2 && images.is_empty() {
                continue;
            }
            n_groups += 1;
            for e in run {
                for o in run {
                    if o.rank == e.rank {
                        if o.local != e.local {
                            n_local_duplicates += 1;
                        }
                        continue;
                    }
                    send[e.rank].push(WireMatch::new(e.local, o.rank, o.local, 0));
                }
                for m in images {
                    if m.rank == e.rank && m.local == e.local {
                        continue;
                    }
                    send[e.rank].push(WireMatch::new(e.local, m.rank, m.local, m.section));
                }
            }
        }
        if n_local_duplicates > 0 {
            log::warn!(
                "rank {}: {} same-rank copies of shared global numbers are not linked",
                comm.rank(),
                n_local_duplicates / 2
            );
        }
        log::debug!(
            "rank {}: {} block entries, {} groups, {} periodic members",
            comm.rank(),
            block.len(),
            n_groups,
            members.len()
        );

        let received = exchange_records(
            comm,
            ExchangeTags::from_base(self.tag.offset(TAG_MATCHES)),
            send,
        )?;

        // 4) assemble interfaces, one per peer rank
        let n_sections = periodicity.map_or(1, |per| per.n_transforms() + 1);
        let by_peer = received
            .into_iter()
            .flatten()
            .map(|w| w.decode())
            .into_group_map_by(|&(_, peer, _, _)| peer);
        let mut interfaces = Vec::with_capacity(by_peer.len());
        for (peer, entries) in by_peer.into_iter().sorted_by_key(|(peer, _)| *peer) {
            let matches = entries
                .into_iter()
                .map(|(local, _, peer_local, section)| Match {
                    section,
                    local,
                    peer_local,
                })
                .collect();
            let (itf, _) = Interface::from_matches(peer, n_sections, matches, periodicity)?;
            log::trace!("rank {}: {}", comm.rank(), itf);
            interfaces.push(itf);
        }
        log::debug!(
            "rank {}: {} interfaces built",
            comm.rank(),
            interfaces.len()
        );

        Ok(Some(
            InterfaceSet::from_interfaces(comm.clone(), interfaces, self.periodicity.clone())
                .with_tag(self.ops_tag),
        ))
    }

    /// Local couples in both directions, with their transform ids.
    fn resolve_couples(&self) -> Result<Vec<Couple>, NumberingError> {
        let Some(per) = self.periodicity.as_deref() else {
            if self.couples.iter().any(|c| !c.couples.is_empty()) {
                log::warn!("periodic couples given without periodicity; ignored");
            }
            return Ok(Vec::new());
        };
        per.validate()?;
        let mut out = Vec::new();
        for list in &self.couples {
            let undefined = |direction: i8| NumberingError::UndefinedTransform {
                periodicity_num: list.periodicity_num,
                direction,
            };
            let direct = per
                .transform_id(list.periodicity_num, 1)
                .ok_or_else(|| undefined(1))?;
            let reverse = per
                .transform_id(list.periodicity_num, -1)
                .ok_or_else(|| undefined(-1))?;
            if per.reverse_id(direct)? != reverse {
                return Err(NumberingError::UndefinedReverse { transform: direct });
            }
            if list.couples.is_empty() {
                log::warn!("no couples declared for periodicity {}", list.periodicity_num);
            }
            for &(a, b) in &list.couples {
                out.push((a, b, direct));
                out.push((b, a, reverse));
            }
        }
        Ok(out)
    }

    /// Exchange couples, close them under composition and return, at the
    /// owner of each image, the copies merged into its group.
    fn periodic_members<C: Communicator>(
        &self,
        comm: &C,
        dist: &BlockDistribution,
        per: &Periodicity,
        block: &[BlockEntry],
        local_couples: Vec<Couple>,
    ) -> Result<Vec<PeriodicMember>, NumberingError> {
        let n_ranks = comm.size();

        let mut send = empty_buffers(n_ranks);
        for (a, b, t) in local_couples {
            send[dist.owner_of(a)].push(WireCouple::new(a, b, t));
        }
        let received = exchange_records(
            comm,
            ExchangeTags::from_base(self.tag.offset(TAG_COUPLES)),
            send,
        )?;
        let mut couples: Vec<Couple> = received.into_iter().flatten().map(|w| w.decode()).collect();
        couples.sort_unstable();
        couples.dedup();

        for level in 1..per.n_levels() {
            let table = per.combine_table(level)?;
            loop {
                let mut send = empty_buffers(n_ranks);
                for run in couples.chunk_by(|a, b| a.0 == b.0) {
                    for (j, a) in run.iter().enumerate() {
                        for b in &run[j + 1..] {
                            if a.1 == b.1 {
                                continue;
                            }
                            let Some(c) = table.get(per.reverse_id(a.2)?, b.2) else {
                                continue;
                            };
                            send[dist.owner_of(a.1)].push(WireCouple::new(a.1, b.1, c));
                            send[dist.owner_of(b.1)].push(WireCouple::new(b.1, a.1, per.reverse_id(c)?));
                        }
                    }
                }
                let received = exchange_records(
                    comm,
                    ExchangeTags::from_base(self.tag.offset(TAG_CLOSURE)),
                    send,
                )?;
                let before = couples.len();
                couples.extend(received.into_iter().flatten().map(|w| w.decode()));
                couples.sort_unstable();
                couples.dedup();
                let added = (couples.len() - before) as u64;
                let total = comm.allreduce_sum_u64(self.tag.offset(TAG_CLOSURE_COUNT), added)?;
                log::debug!("periodic closure level {level}: {total} new couples");
                if total == 0 {
                    break;
                }
            }
        }

        // copies of num_1 join the group of num_2 through reverse(t)
        let mut send = empty_buffers(n_ranks);
        let mut unresolved = None;
        for &(a, b, t) in &couples {
            let copies = run_of(block, a, |e| e.gnum);
            if copies.is_empty() {
                unresolved.get_or_insert(a);
                continue;
            }
            let section = per.reverse_id(t)? + 1;
            for e in copies {
                send[dist.owner_of(b)].push(WirePeriodicCopy::new(b, e.rank, e.local, section));
            }
        }
        let check = match unresolved {
            Some(global_number) => Err(NumberingError::UnresolvedPeriodicCouple { global_number }),
            None => Ok(()),
        };
        agree(comm, self.tag.offset(TAG_AGREE), check)?;

        let received = exchange_records(
            comm,
            ExchangeTags::from_base(self.tag.offset(TAG_COPIES)),
            send,
        )?;
        let mut members: Vec<PeriodicMember> = received
            .into_iter()
            .flatten()
            .map(|w| {
                let (gnum, rank, local, section) = w.decode();
                PeriodicMember {
                    gnum,
                    rank,
                    local,
                    section,
                }
            })
            .collect();
        members.sort_unstable();
        members.dedup();
        Ok(members)
    }
}
