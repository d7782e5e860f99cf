mod util;

use std::sync::Arc;

use mesh_numbering::algs::communicator::{Communicator, LocalComm};
use mesh_numbering::data::datatype::Layout;
use mesh_numbering::data::range_set::{RangeSet, RangeSetConfig};
use mesh_numbering::interface::{InterfaceSet, InterfaceSetBuilder};
use mesh_numbering::numbering_error::NumberingError;
use mesh_numbering::topology::periodicity::{PeriodicExclusion, Periodicity};
use util::{assert_ranges_partition, run_ranks};

/// Rank 0 holds `{1, 2}`, rank 1 holds `{3, 4}`; 4 is the image of 1.
fn across_ranks(comm: &LocalComm, rotation: bool) -> InterfaceSet<LocalComm> {
    let mut per = Periodicity::new();
    if rotation {
        per.add_rotation(1).unwrap();
    } else {
        per.add_translation(1).unwrap();
    }
    let gnums: Vec<u64> = if comm.rank() == 0 { vec![1, 2] } else { vec![3, 4] };
    let mut builder = InterfaceSetBuilder::new().periodicity(Arc::new(per));
    if comm.rank() == 0 {
        builder = builder.periodic_couples(1, vec![(1, 4)]);
    }
    builder.build(comm, &gnums).unwrap().unwrap()
}

fn numbered(comm: &LocalComm, exclusion: PeriodicExclusion) -> (Vec<u64>, std::ops::Range<u64>) {
    let ifs = across_ranks(comm, false);
    let config = RangeSetConfig {
        exclusion,
        ..Default::default()
    };
    let rs = RangeSet::from_interfaces(&ifs, 2, config).unwrap();
    (rs.g_ids().to_vec(), rs.l_range())
}

#[test]
fn periodic_image_on_another_rank_shares_an_id() {
    let out = run_ranks(2, |comm| numbered(comm, PeriodicExclusion::None));
    let ranges: Vec<_> = out.iter().map(|(_, r)| r.clone()).collect();
    // three distinct elements once 1 and 4 are merged
    assert_ranges_partition(&ranges, 0, 3);
    assert_eq!(out[0].1, 0..1);
    assert_eq!(out[1].1, 1..3);
    assert_eq!(out[0].0, vec![2, 0]);
    assert_eq!(out[1].0, vec![1, 2]);
    // gnum 1 on rank 0 and its image 4 on rank 1
    assert_eq!(out[0].0[0], out[1].0[1]);
}

#[test]
fn excluded_images_keep_their_own_ids() {
    let out = run_ranks(2, |comm| numbered(comm, PeriodicExclusion::All));
    assert_eq!(out[0].1, 0..2);
    assert_eq!(out[1].1, 2..4);
    assert_eq!(out[0].0, vec![0, 1]);
    assert_eq!(out[1].0, vec![2, 3]);
}

#[test]
fn sum_skips_excluded_transforms() {
    let out = run_ranks(2, |comm| {
        let ifs = across_ranks(comm, true);
        let base = if comm.rank() == 0 { [1.0f64, 2.0] } else { [3.0, 4.0] };
        let mut all = base.to_vec();
        ifs.sum(1, Layout::Interleaved, PeriodicExclusion::None, &mut all)
            .unwrap();
        let mut rotations_skipped = base.to_vec();
        ifs.sum(1, Layout::Interleaved, PeriodicExclusion::Rotation, &mut rotations_skipped)
            .unwrap();
        (all, rotations_skipped)
    });
    assert_eq!(out[0].0, vec![5.0, 2.0]);
    assert_eq!(out[1].0, vec![3.0, 5.0]);
    assert_eq!(out[0].1, vec![1.0, 2.0]);
    assert_eq!(out[1].1, vec![3.0, 4.0]);
}

#[test]
fn rotation_exclusion_numbering_is_refused_everywhere() {
    let out = run_ranks(2, |comm| {
        let ifs = across_ranks(comm, true);
        let config = RangeSetConfig {
            exclusion: PeriodicExclusion::Rotation,
            ..Default::default()
        };
        RangeSet::from_interfaces(&ifs, 2, config).map(|rs| rs.l_range())
    });
    for res in out {
        assert_eq!(res.unwrap_err(), NumberingError::UnsupportedExclusion);
    }
}

fn corner(comm: &LocalComm, exclusion: PeriodicExclusion) -> (Vec<u64>, std::ops::Range<u64>) {
    // 2x2 corner split over two ranks
    let mut per = Periodicity::new();
    per.add_translation(1).unwrap();
    per.add_translation(2).unwrap();
    per.combine(2).unwrap();
    let (gnums, couples_1, couples_2) = if comm.rank() == 0 {
        (vec![1u64, 2], vec![(1, 2)], vec![(1, 3)])
    } else {
        (vec![3, 4], vec![(3, 4)], vec![(2, 4)])
    };
    let ifs = InterfaceSetBuilder::new()
        .periodicity(Arc::new(per))
        .periodic_couples(1, couples_1)
        .periodic_couples(2, couples_2)
        .build(comm, &gnums)
        .unwrap()
        .unwrap();
    let config = RangeSetConfig {
        exclusion,
        ..Default::default()
    };
    let rs = RangeSet::from_interfaces(&ifs, gnums.len(), config).unwrap();
    (rs.g_ids().to_vec(), rs.l_range())
}

#[test]
fn composed_translations_merge_all_corners() {
    let out = run_ranks(2, |comm| corner(comm, PeriodicExclusion::None));
    let ranges: Vec<_> = out.iter().map(|(_, r)| r.clone()).collect();
    assert_ranges_partition(&ranges, 0, 1);
    assert!(out.iter().all(|(ids, _)| ids.iter().all(|&g| g == 0)));
}

#[test]
fn composed_translations_excluded() {
    let out = run_ranks(2, |comm| corner(comm, PeriodicExclusion::All));
    let ranges: Vec<_> = out.iter().map(|(_, r)| r.clone()).collect();
    assert_ranges_partition(&ranges, 0, 4);
    assert_eq!(out[0].0, vec![0, 1]);
    assert_eq!(out[1].0, vec![2, 3]);
}
