//! Fixed-width, little-endian wire records for the numbering exchanges.
//!
//! All multi-byte integers in these structs are **little-endian** on the wire.
//! We store them pre-LE with `.to_le()` and decode with `.from_le()`.
//! Ranks are `u32` on the wire, never `usize`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy raw bytes into a freshly allocated record vector.
///
/// Returns `None` when `bytes` is not a whole number of records.
pub fn records_from_bytes<T: Pod>(bytes: &[u8]) -> Option<Vec<T>> {
    let width = size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return None;
    }
    let mut out = vec![T::zeroed(); bytes.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Some(out)
}

/// Number of records following in the payload phase.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A single `u64` value (global number or global id).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireU64 {
    pub v_le: u64,
}

impl WireU64 {
    pub fn of(v: u64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.v_le)
    }
}

/// `(global_number, local_index)` sent to the rendezvous owner.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireElement {
    pub gnum_le: u64,
    pub local_le: u64,
}

impl WireElement {
    pub fn new(gnum: u64, local: usize) -> Self {
        Self {
            gnum_le: gnum.to_le(),
            local_le: (local as u64).to_le(),
        }
    }
    pub fn gnum(&self) -> u64 {
        u64::from_le(self.gnum_le)
    }
    pub fn local(&self) -> usize {
        u64::from_le(self.local_le) as usize
    }
}

/// Periodic couple `(num_1, num_2, transform)`: `num_2` is the image of
/// `num_1` through `transform`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCouple {
    pub num_1_le: u64,
    pub num_2_le: u64,
    pub tr_le: u32,
    pub _pad: u32,
}

impl WireCouple {
    pub fn new(num_1: u64, num_2: u64, tr: usize) -> Self {
        Self {
            num_1_le: num_1.to_le(),
            num_2_le: num_2.to_le(),
            tr_le: (tr as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn decode(&self) -> (u64, u64, usize) {
        (
            u64::from_le(self.num_1_le),
            u64::from_le(self.num_2_le),
            u32::from_le(self.tr_le) as usize,
        )
    }
}

/// One copy `(rank, local)` of an element, to be merged into the group of
/// global number `target` with section id `section` (0 = parallel, t+1 = transform t).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePeriodicCopy {
    pub target_le: u64,
    pub local_le: u64,
    pub rank_le: u32,
    pub section_le: u32,
}

impl WirePeriodicCopy {
    pub fn new(target: u64, rank: usize, local: usize, section: usize) -> Self {
        Self {
            target_le: target.to_le(),
            local_le: (local as u64).to_le(),
            rank_le: (rank as u32).to_le(),
            section_le: (section as u32).to_le(),
        }
    }
    pub fn decode(&self) -> (u64, usize, usize, usize) {
        (
            u64::from_le(self.target_le),
            u32::from_le(self.rank_le) as usize,
            u64::from_le(self.local_le) as usize,
            u32::from_le(self.section_le) as usize,
        )
    }
}

/// Equivalence entry shipped back to a holder: its element `local` matches
/// `peer_local` on `peer_rank` through section `section`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMatch {
    pub local_le: u64,
    pub peer_local_le: u64,
    pub peer_rank_le: u32,
    pub section_le: u32,
}

impl WireMatch {
    pub const SIZE: usize = 24; // 2*8 + 4 + 4
    pub fn new(local: usize, peer_rank: usize, peer_local: usize, section: usize) -> Self {
        Self {
            local_le: (local as u64).to_le(),
            peer_local_le: (peer_local as u64).to_le(),
            peer_rank_le: (peer_rank as u32).to_le(),
            section_le: (section as u32).to_le(),
        }
    }
    pub fn decode(&self) -> (usize, usize, usize, usize) {
        (
            u64::from_le(self.local_le) as usize,
            u32::from_le(self.peer_rank_le) as usize,
            u64::from_le(self.peer_local_le) as usize,
            u32::from_le(self.section_le) as usize,
        )
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireU64>(), 8);

const _: () = {
    assert!(size_of::<WireElement>() == 16);
    assert!(size_of::<WireCouple>() == 24);
    assert!(size_of::<WirePeriodicCopy>() == 24);
    assert!(size_of::<WireMatch>() == WireMatch::SIZE);
    assert!(align_of::<WireMatch>() == 8);
};
