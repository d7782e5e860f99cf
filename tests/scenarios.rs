mod util;

use std::sync::Arc;

use mesh_numbering::algs::communicator::{Communicator, NoComm};
use mesh_numbering::data::datatype::Layout;
use mesh_numbering::data::halo::{Halo, HaloPeer};
use mesh_numbering::data::range_set::{RangeSet, RangeSetConfig};
use mesh_numbering::interface::InterfaceSetBuilder;
use mesh_numbering::topology::periodicity::{PeriodicExclusion, Periodicity};
use util::{assert_ranges_partition, interfaces_of, number, run_ranks};

fn two_rank_gnums(rank: usize) -> Vec<u64> {
    if rank == 0 { vec![1, 2, 3, 4] } else { vec![3, 4, 5, 6] }
}

#[test]
fn two_ranks_share_two_elements() {
    let out = run_ranks(2, |comm| {
        let gnums = two_rank_gnums(comm.rank());
        let ifs = interfaces_of(comm, &gnums).unwrap();
        let shape: Vec<(usize, usize)> =
            ifs.interfaces().iter().map(|itf| (itf.peer(), itf.len())).collect();
        let rs = RangeSet::from_interfaces(&ifs, gnums.len(), RangeSetConfig::default()).unwrap();
        (shape, rs.g_ids().to_vec(), rs.l_range())
    });

    assert_eq!(out[0].0, vec![(1, 2)]);
    assert_eq!(out[1].0, vec![(0, 2)]);
    // shared elements go to the higher rank
    assert_eq!(out[0].2, 0..2);
    assert_eq!(out[1].2, 2..6);
    assert_eq!(out[0].1, vec![0, 1, 2, 3]);
    assert_eq!(out[1].1, vec![2, 3, 4, 5]);
    // global number 3 is local 2 on rank 0 and local 0 on rank 1
    assert_eq!(out[0].1[2], out[1].1[0]);
}

#[test]
fn two_ranks_balanced_split() {
    let config = RangeSetConfig {
        balance: true,
        ..Default::default()
    };
    let out = run_ranks(2, |comm| number(comm, &two_rank_gnums(comm.rank()), config));
    assert_eq!(out[0].1, 0..3);
    assert_eq!(out[1].1, 3..6);
    assert_eq!(out[0].0, vec![0, 1, 2, 3]);
    assert_eq!(out[1].0, vec![2, 3, 4, 5]);
}

#[test]
fn id_base_shifts_every_id() {
    let config = RangeSetConfig {
        id_base: 1,
        ..Default::default()
    };
    let out = run_ranks(2, |comm| number(comm, &two_rank_gnums(comm.rank()), config));
    assert_eq!(out[0].1, 1..3);
    assert_eq!(out[1].1, 3..7);
    assert_eq!(out[0].0, vec![1, 2, 3, 4]);
}

fn translated_pair(exclusion: PeriodicExclusion) -> Vec<u64> {
    let mut per = Periodicity::new();
    per.add_translation(1).unwrap();
    let ifs = InterfaceSetBuilder::new()
        .periodicity(Arc::new(per))
        .periodic_couples(1, vec![(1, 2)])
        .build(&NoComm, &[1, 2, 3])
        .unwrap()
        .unwrap();
    let config = RangeSetConfig {
        exclusion,
        ..Default::default()
    };
    RangeSet::from_interfaces(&ifs, 3, config).unwrap().into_g_ids()
}

#[test]
fn translation_couple_merges_unless_excluded() {
    let merged = translated_pair(PeriodicExclusion::None);
    assert_eq!(merged[0], merged[1]);
    assert_eq!(merged, vec![0, 0, 1]);

    // translations survive a rotation exclusion
    assert_eq!(translated_pair(PeriodicExclusion::Rotation), merged);

    let split = translated_pair(PeriodicExclusion::All);
    assert_ne!(split[0], split[1]);
    assert_eq!(split, vec![0, 1, 2]);
}

fn ring_gnums(rank: usize) -> Vec<u64> {
    // element 10 everywhere, edge 20 + r shared with the next rank
    vec![10, 20 + rank as u64, 20 + ((rank + 1) % 3) as u64]
}

#[test]
fn three_way_sum_is_complete() {
    let out = run_ranks(3, |comm| {
        let gnums = ring_gnums(comm.rank());
        let ifs = interfaces_of(comm, &gnums).unwrap();
        let r = comm.rank() as f64;
        let mut values = vec![r + 1.0, 10.0 * (r + 1.0), 100.0 * (r + 1.0)];
        ifs.sum(1, Layout::Interleaved, PeriodicExclusion::None, &mut values)
            .unwrap();
        (ifs.len(), values)
    });
    for (rank, (n_interfaces, values)) in out.iter().enumerate() {
        assert_eq!(*n_interfaces, 2, "rank {rank}");
        assert_eq!(values[0], 6.0, "rank {rank} holds a partial sum");
    }
    // edge 20 lives on rank 0 (slot 1) and rank 2 (slot 2)
    assert_eq!(out[0].1[1], 10.0 + 300.0);
    assert_eq!(out[2].1[2], 10.0 + 300.0);
    // edge 21 on ranks 0 and 1
    assert_eq!(out[0].1[2], 100.0 + 20.0);
    assert_eq!(out[1].1[1], 100.0 + 20.0);
}

#[test]
fn three_way_ring_numbering() {
    let out = run_ranks(3, |comm| number(comm, &ring_gnums(comm.rank()), RangeSetConfig::default()));
    let ranges: Vec<_> = out.iter().map(|(_, r)| r.clone()).collect();
    assert_ranges_partition(&ranges, 0, 4);
    let id_of = |rank: usize, slot: usize| out[rank].0[slot];
    assert_eq!(id_of(0, 0), id_of(1, 0));
    assert_eq!(id_of(1, 0), id_of(2, 0));
    assert_eq!(id_of(0, 1), id_of(2, 2));
    assert_eq!(id_of(0, 2), id_of(1, 1));
    assert_eq!(id_of(1, 2), id_of(2, 1));
}

#[test]
fn three_way_balance_still_partitions() {
    let config = RangeSetConfig {
        balance: true,
        ..Default::default()
    };
    let out = run_ranks(3, |comm| number(comm, &ring_gnums(comm.rank()), config));
    let ranges: Vec<_> = out.iter().map(|(_, r)| r.clone()).collect();
    assert_ranges_partition(&ranges, 0, 4);
    assert_eq!(out[0].0[0], out[1].0[0]);
    assert_eq!(out[1].0[0], out[2].0[0]);
}

#[test]
fn halo_cells_over_two_ranks() {
    let out = run_ranks(2, |comm| {
        let other = 1 - comm.rank();
        let halo = Halo::new(
            comm.clone(),
            3,
            vec![HaloPeer {
                rank: other,
                send_ids: vec![0],
                ghost_start: 3,
                ghost_len: 1,
            }],
        )
        .unwrap();
        let rs = RangeSet::from_halo(&halo, RangeSetConfig::default()).unwrap();
        let r = comm.rank() as f32;
        let mut values = vec![r, r + 0.5, r + 0.25, -1.0];
        rs.zero_out_of_range(1, &mut values).unwrap();
        let zeroed = values[3];
        let owned = rs.gather(1, &values).unwrap();
        let spread = rs.scatter(1, &owned).unwrap();
        (rs.g_ids().to_vec(), rs.l_range(), zeroed, spread)
    });
    assert_eq!(out[0].0, vec![0, 1, 2, 3]);
    assert_eq!(out[1].0, vec![3, 4, 5, 0]);
    assert_eq!(out[0].1, 0..3);
    assert_eq!(out[1].1, 3..6);
    assert_eq!(out[0].2, 0.0);
    assert_eq!(out[0].3, vec![0.0, 0.5, 0.25, 1.0]);
    assert_eq!(out[1].3, vec![1.0, 1.5, 1.25, 0.0]);
}
