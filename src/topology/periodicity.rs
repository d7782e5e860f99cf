//! Periodic transform descriptor.
//!
//! A [`Periodicity`] is an ordered list of transforms. Base (level 1)
//! transforms come in direct/reverse pairs, one pair per declared
//! periodicity. Composed transforms (level 2 and 3) combine base transforms
//! of distinct periodicities; their combination tables let the interface
//! builder close periodic couples under composition.
//!
//! Transforms are stored by non-decreasing level, so the transforms of
//! levels `1..=l` always form the id prefix `0..n_transforms_up_to(l)`.

use serde::{Deserialize, Serialize};

use crate::numbering_error::NumberingError;

/// Geometric classification of a transform.
///
/// The ordering matters: exclusion filters compare against it.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PeriodicityKind {
    #[default]
    Null,
    Translation,
    Rotation,
    Mixed,
}

impl PeriodicityKind {
    /// Classification of the composition of two transforms.
    pub fn compose(self, other: Self) -> Self {
        match (self, other) {
            (Self::Null, k) | (k, Self::Null) => k,
            (a, b) if a == b => a,
            _ => Self::Mixed,
        }
    }
}

/// Which periodic sections an operation should ignore.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodicExclusion {
    /// Every section contributes.
    #[default]
    None,
    /// Rotation and mixed transforms are ignored; translations contribute.
    Rotation,
    /// Only pure-parallel sharing contributes.
    All,
}

impl PeriodicExclusion {
    /// `true` if sections of transforms of this kind are skipped.
    pub fn excludes(self, kind: PeriodicityKind) -> bool {
        match self {
            Self::None => false,
            Self::Rotation => kind >= PeriodicityKind::Rotation,
            Self::All => true,
        }
    }
}

/// How a transform is built from base transforms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Composition {
    /// Level 1: direct (`+1`) or reverse (`-1`) transform of a periodicity.
    Base { periodicity_num: usize, direction: i8 },
    /// Level 2: composition of two level-1 transforms.
    Pair([usize; 2]),
    /// Level 3: composition of three level-1 transforms.
    Triple([usize; 3]),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub kind: PeriodicityKind,
    pub reverse_id: usize,
    pub composition: Composition,
}

impl Transform {
    pub fn level(&self) -> usize {
        match self.composition {
            Composition::Base { .. } => 1,
            Composition::Pair(_) => 2,
            Composition::Triple(_) => 3,
        }
    }
}

/// Dense, symmetric `n_rows x n_rows` table of composed transform ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombineTable {
    n_rows: usize,
    cells: Vec<Option<usize>>,
}

impl CombineTable {
    fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            cells: vec![None; n_rows * n_rows],
        }
    }

    fn set_symmetric(&mut self, a: usize, b: usize, id: usize) {
        self.cells[a * self.n_rows + b] = Some(id);
        self.cells[b * self.n_rows + a] = Some(id);
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Composition of `a` and `b`, if both are rows and it is defined.
    pub fn get(&self, a: usize, b: usize) -> Option<usize> {
        if a < self.n_rows && b < self.n_rows {
            self.cells[a * self.n_rows + b]
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Periodicity {
    transforms: Vec<Transform>,
}

impl Periodicity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an explicit transform list, checking every invariant.
    pub fn from_transforms(transforms: Vec<Transform>) -> Result<Self, NumberingError> {
        let per = Self { transforms };
        per.validate()?;
        Ok(per)
    }

    /// Append the direct/reverse pair of a new base periodicity.
    ///
    /// Returns `(direct_id, reverse_id)`.
    pub fn add_transform(
        &mut self,
        periodicity_num: usize,
        kind: PeriodicityKind,
    ) -> Result<(usize, usize), NumberingError> {
        let direct = self.transforms.len();
        if self.n_levels() > 1 {
            return Err(NumberingError::TransformOrder {
                transform: direct,
                level: 1,
            });
        }
        let reverse = direct + 1;
        self.transforms.push(Transform {
            kind,
            reverse_id: reverse,
            composition: Composition::Base {
                periodicity_num,
                direction: 1,
            },
        });
        self.transforms.push(Transform {
            kind,
            reverse_id: direct,
            composition: Composition::Base {
                periodicity_num,
                direction: -1,
            },
        });
        Ok((direct, reverse))
    }

    pub fn add_translation(&mut self, periodicity_num: usize) -> Result<(usize, usize), NumberingError> {
        self.add_transform(periodicity_num, PeriodicityKind::Translation)
    }

    pub fn add_rotation(&mut self, periodicity_num: usize) -> Result<(usize, usize), NumberingError> {
        self.add_transform(periodicity_num, PeriodicityKind::Rotation)
    }

    /// Generate composed transforms up to `max_level` (2 or 3).
    ///
    /// Every set of base transforms from pairwise distinct periodicities gets
    /// one composed transform; its reverse composes the reverses.
    pub fn combine(&mut self, max_level: usize) -> Result<(), NumberingError> {
        if self.n_levels() > 1 {
            return Err(NumberingError::TransformOrder {
                transform: self.transforms.len(),
                level: self.n_levels(),
            });
        }
        let n_base = self.transforms.len();
        let num_of = |per: &Self, t: usize| match per.transforms[t].composition {
            Composition::Base { periodicity_num, .. } => periodicity_num,
            _ => usize::MAX,
        };

        if max_level >= 2 {
            let mut seen = Vec::<[usize; 2]>::new();
            for i in 0..n_base {
                for j in i + 1..n_base {
                    if num_of(self, i) == num_of(self, j) || seen.contains(&[i, j]) {
                        continue;
                    }
                    let mut rev = [self.transforms[i].reverse_id, self.transforms[j].reverse_id];
                    rev.sort_unstable();
                    let kind = self.transforms[i].kind.compose(self.transforms[j].kind);
                    self.push_composed_pair(kind, Composition::Pair([i, j]), Composition::Pair(rev));
                    seen.push([i, j]);
                    seen.push(rev);
                }
            }
        }

        if max_level >= 3 {
            let mut seen = Vec::<[usize; 3]>::new();
            for i in 0..n_base {
                for j in i + 1..n_base {
                    for k in j + 1..n_base {
                        let (ni, nj, nk) = (num_of(self, i), num_of(self, j), num_of(self, k));
                        if ni == nj || ni == nk || nj == nk || seen.contains(&[i, j, k]) {
                            continue;
                        }
                        let mut rev = [
                            self.transforms[i].reverse_id,
                            self.transforms[j].reverse_id,
                            self.transforms[k].reverse_id,
                        ];
                        rev.sort_unstable();
                        let kind = self.transforms[i]
                            .kind
                            .compose(self.transforms[j].kind)
                            .compose(self.transforms[k].kind);
                        self.push_composed_pair(
                            kind,
                            Composition::Triple([i, j, k]),
                            Composition::Triple(rev),
                        );
                        seen.push([i, j, k]);
                        seen.push(rev);
                    }
                }
            }
        }

        self.validate()
    }

    fn push_composed_pair(&mut self, kind: PeriodicityKind, direct: Composition, reverse: Composition) {
        let id = self.transforms.len();
        self.transforms.push(Transform {
            kind,
            reverse_id: id + 1,
            composition: direct,
        });
        self.transforms.push(Transform {
            kind,
            reverse_id: id,
            composition: reverse,
        });
    }

    /// Check reverse ids, level ordering and composition references.
    pub fn validate(&self) -> Result<(), NumberingError> {
        let n = self.transforms.len();
        let mut prev_level = 1;
        for (id, tr) in self.transforms.iter().enumerate() {
            let rev = tr.reverse_id;
            if rev >= n || self.transforms[rev].reverse_id != id {
                return Err(NumberingError::UndefinedReverse { transform: id });
            }
            let level = tr.level();
            if level < prev_level {
                return Err(NumberingError::TransformOrder { transform: id, level });
            }
            prev_level = level;
            let components: &[usize] = match &tr.composition {
                Composition::Base { .. } => &[],
                Composition::Pair(p) => p,
                Composition::Triple(c) => c,
            };
            if components
                .iter()
                .any(|&c| c >= n || self.transforms[c].level() != 1)
            {
                return Err(NumberingError::UnresolvedComposition { transform: id, level });
            }
        }
        Ok(())
    }

    pub fn n_transforms(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Highest composition level present (0 when empty).
    pub fn n_levels(&self) -> usize {
        self.transforms.last().map_or(0, Transform::level)
    }

    /// Number of transforms with level `<= level`.
    pub fn n_transforms_up_to(&self, level: usize) -> usize {
        self.transforms.partition_point(|t| t.level() <= level)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn transform(&self, id: usize) -> Option<&Transform> {
        self.transforms.get(id)
    }

    pub fn reverse_id(&self, id: usize) -> Result<usize, NumberingError> {
        self.transforms
            .get(id)
            .map(|t| t.reverse_id)
            .ok_or(NumberingError::UndefinedReverse { transform: id })
    }

    /// Kind of transform `id`; `Null` for unknown ids.
    pub fn kind(&self, id: usize) -> PeriodicityKind {
        self.transforms.get(id).map_or(PeriodicityKind::Null, |t| t.kind)
    }

    pub fn level(&self, id: usize) -> Option<usize> {
        self.transforms.get(id).map(Transform::level)
    }

    /// `true` if any transform is a rotation or mixed.
    pub fn has_rotation(&self) -> bool {
        self.transforms
            .iter()
            .any(|t| t.kind >= PeriodicityKind::Rotation)
    }

    /// Base transform of `periodicity_num` in the given direction (`+1`/`-1`).
    pub fn transform_id(&self, periodicity_num: usize, direction: i8) -> Option<usize> {
        self.transforms.iter().position(|t| {
            t.composition
                == Composition::Base {
                    periodicity_num,
                    direction,
                }
        })
    }

    /// Combination table mapping pairs of transforms of level `<= level`
    /// to their level `level + 1` composition.
    ///
    /// Level 1 uses the parent pairs directly. Level 2 pairs every level-2
    /// transform with the remaining base component of each level-3 transform.
    pub fn combine_table(&self, level: usize) -> Result<CombineTable, NumberingError> {
        let mut table = CombineTable::new(self.n_transforms_up_to(level));
        match level {
            1 => {
                for (id, tr) in self.transforms.iter().enumerate() {
                    if let Composition::Pair([a, b]) = tr.composition {
                        table.set_symmetric(a, b, id);
                    }
                }
            }
            2 => {
                let lower = self.combine_table(1)?;
                for (id, tr) in self.transforms.iter().enumerate() {
                    if let Composition::Triple([c0, c1, c2]) = tr.composition {
                        let unresolved = NumberingError::UnresolvedComposition { transform: id, level: 3 };
                        let t01 = lower.get(c0, c1).ok_or_else(|| unresolved.clone())?;
                        let t02 = lower.get(c0, c2).ok_or_else(|| unresolved.clone())?;
                        let t12 = lower.get(c1, c2).ok_or(unresolved)?;
                        table.set_symmetric(t01, c2, id);
                        table.set_symmetric(t02, c1, id);
                        table.set_symmetric(t12, c0, id);
                    }
                }
            }
            _ => {}
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_translations() -> Periodicity {
        let mut per = Periodicity::new();
        per.add_translation(1).unwrap();
        per.add_translation(2).unwrap();
        per
    }

    #[test]
    fn base_pairs_are_mutual_reverses() {
        let per = two_translations();
        assert_eq!(per.n_transforms(), 4);
        assert_eq!(per.reverse_id(0).unwrap(), 1);
        assert_eq!(per.reverse_id(3).unwrap(), 2);
        assert_eq!(per.transform_id(2, -1), Some(3));
        assert_eq!(per.transform_id(3, 1), None);
        assert_eq!(per.n_levels(), 1);
    }

    #[test]
    fn combine_two_periodicities() {
        let mut per = two_translations();
        per.combine(2).unwrap();
        // {0,2}, {1,3}, {0,3}, {1,2}
        assert_eq!(per.n_transforms(), 8);
        assert_eq!(per.n_levels(), 2);
        assert_eq!(per.n_transforms_up_to(1), 4);
        let table = per.combine_table(1).unwrap();
        assert_eq!(table.n_rows(), 4);
        let t = table.get(0, 2).unwrap();
        assert_eq!(table.get(2, 0), Some(t));
        let rev = per.reverse_id(t).unwrap();
        assert_eq!(table.get(1, 3), Some(rev));
        // same periodicity never composes
        assert_eq!(table.get(0, 1), None);
        assert_eq!(per.kind(t), PeriodicityKind::Translation);
    }

    #[test]
    fn three_periodicities_reach_level_three() {
        let mut per = Periodicity::new();
        per.add_translation(1).unwrap();
        per.add_translation(2).unwrap();
        per.add_rotation(3).unwrap();
        per.combine(3).unwrap();
        // 12 pairs + 8 triples
        assert_eq!(per.n_transforms(), 6 + 12 + 8);
        assert_eq!(per.n_levels(), 3);
        let t2 = per.combine_table(2).unwrap();
        assert_eq!(t2.n_rows(), 18);
        let t1 = per.combine_table(1).unwrap();
        let t02 = t1.get(0, 2).unwrap();
        let triple = t2.get(t02, 4).unwrap();
        assert_eq!(per.level(triple), Some(3));
        assert_eq!(per.kind(triple), PeriodicityKind::Mixed);
        assert!(per.has_rotation());
    }

    #[test]
    fn broken_reverse_is_rejected() {
        let transforms = vec![Transform {
            kind: PeriodicityKind::Translation,
            reverse_id: 3,
            composition: Composition::Base {
                periodicity_num: 1,
                direction: 1,
            },
        }];
        assert_eq!(
            Periodicity::from_transforms(transforms),
            Err(NumberingError::UndefinedReverse { transform: 0 })
        );
    }

    #[test]
    fn missing_parent_relation_is_rejected() {
        let mut per = Periodicity::new();
        per.add_translation(1).unwrap();
        per.add_translation(2).unwrap();
        per.add_translation(3).unwrap();
        let mut transforms = per.transforms().to_vec();
        // a triple without the level-2 pairs it needs
        transforms.push(Transform {
            kind: PeriodicityKind::Translation,
            reverse_id: 7,
            composition: Composition::Triple([0, 2, 4]),
        });
        transforms.push(Transform {
            kind: PeriodicityKind::Translation,
            reverse_id: 6,
            composition: Composition::Triple([1, 3, 5]),
        });
        let per = Periodicity::from_transforms(transforms).unwrap();
        assert!(matches!(
            per.combine_table(2),
            Err(NumberingError::UnresolvedComposition { transform: 6, level: 3 })
        ));
    }

    #[test]
    fn exclusion_thresholds() {
        use PeriodicityKind::*;
        assert!(!PeriodicExclusion::None.excludes(Rotation));
        assert!(!PeriodicExclusion::Rotation.excludes(Translation));
        assert!(PeriodicExclusion::Rotation.excludes(Mixed));
        assert!(PeriodicExclusion::All.excludes(Translation));
    }
}
