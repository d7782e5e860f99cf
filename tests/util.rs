#![allow(dead_code)]
use std::ops::Range;

use mesh_numbering::algs::communicator::LocalComm;
use mesh_numbering::data::range_set::{RangeSet, RangeSetConfig};
use mesh_numbering::interface::{InterfaceSet, InterfaceSetBuilder};

/// Run `f` on every rank of an isolated `n`-rank universe; results by rank.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&LocalComm) -> T + Sync,
{
    let comms = LocalComm::group(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms.iter().map(|c| s.spawn(move || f(c))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Build the interface set of `gnums` without periodicity.
pub fn interfaces_of(comm: &LocalComm, gnums: &[u64]) -> Option<InterfaceSet<LocalComm>> {
    InterfaceSetBuilder::new().build(comm, gnums).unwrap()
}

/// Global ids and owned range of `gnums`, numbered through an interface set.
pub fn number(comm: &LocalComm, gnums: &[u64], config: RangeSetConfig) -> (Vec<u64>, Range<u64>) {
    match interfaces_of(comm, gnums) {
        Some(ifs) => {
            let rs = RangeSet::from_interfaces(&ifs, gnums.len(), config).unwrap();
            (rs.g_ids().to_vec(), rs.l_range())
        }
        None => {
            let rs = RangeSet::standalone(comm, gnums.len(), config.id_base).unwrap();
            (rs.g_ids().to_vec(), rs.l_range())
        }
    }
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}

/// Assert the owned ranges of all ranks tile `[base, base + n)` in rank order.
pub fn assert_ranges_partition(ranges: &[Range<u64>], base: u64, n: u64) {
    let mut next = base;
    for (rank, r) in ranges.iter().enumerate() {
        assert_eq!(r.start, next, "rank {rank} range {r:?} leaves a gap or overlaps");
        assert!(r.end >= r.start);
        next = r.end;
    }
    assert_eq!(next, base + n, "ranges {ranges:?} do not cover {n} ids");
}
