//! Bucketed spatial index for area-of-interest queries.
//!
//! Tiles are grouped into square buckets per map. A query visits the
//! buckets covering the radius and filters candidates by exact Chebyshev
//! distance. With a 16-tile bucket and the 15-tile screen radius this is
//! the 3x3 neighbourhood.

use std::collections::{HashMap, HashSet};

use crate::game::types::chebyshev;

/// Tiles per bucket edge.
pub const BUCKET_SIZE: i32 = 16;

/// Player screen radius in tiles.
pub const SCREEN_RADIUS: i32 = 15;

/// Handle to any entity placed in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    /// Keyed by session id
    Player(u64),
    Npc(u32),
    Ground(u32),
    Door(u32),
    Companion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub map: i32,
    pub x: i32,
    pub y: i32,
}

type BucketKey = (i32, i32, i32);

fn bucket_of(p: Pos) -> BucketKey {
    (p.map, p.x.div_euclid(BUCKET_SIZE), p.y.div_euclid(BUCKET_SIZE))
}

#[derive(Debug, Default)]
pub struct AoiGrid {
    buckets: HashMap<BucketKey, HashSet<EntityRef>>,
    positions: HashMap<EntityRef, Pos>,
}

impl AoiGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, e: EntityRef, pos: Pos) {
        if self.positions.contains_key(&e) {
            self.update(e, pos);
            return;
        }
        self.buckets.entry(bucket_of(pos)).or_default().insert(e);
        self.positions.insert(e, pos);
    }

    pub fn remove(&mut self, e: EntityRef) -> Option<Pos> {
        let pos = self.positions.remove(&e)?;
        let key = bucket_of(pos);
        if let Some(set) = self.buckets.get_mut(&key) {
            set.remove(&e);
            if set.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(pos)
    }

    /// Move an entity. Bucket sets are untouched when the bucket did not change.
    pub fn update(&mut self, e: EntityRef, pos: Pos) {
        let Some(old) = self.positions.get_mut(&e) else {
            self.insert(e, pos);
            return;
        };
        let (old_key, new_key) = (bucket_of(*old), bucket_of(pos));
        *old = pos;
        if old_key == new_key {
            return;
        }
        if let Some(set) = self.buckets.get_mut(&old_key) {
            set.remove(&e);
            if set.is_empty() {
                self.buckets.remove(&old_key);
            }
        }
        self.buckets.entry(new_key).or_default().insert(e);
    }

    pub fn position(&self, e: EntityRef) -> Option<Pos> {
        self.positions.get(&e).copied()
    }

    /// Every entity within `radius` of (map, x, y), unordered.
    pub fn query(&self, map: i32, x: i32, y: i32, radius: i32) -> Vec<EntityRef> {
        let rings = (radius + BUCKET_SIZE - 1) / BUCKET_SIZE;
        let (_, bx, by) = bucket_of(Pos { map, x, y });
        let mut out = Vec::new();
        for dx in -rings..=rings {
            for dy in -rings..=rings {
                let Some(set) = self.buckets.get(&(map, bx + dx, by + dy)) else {
                    continue;
                };
                for e in set {
                    if let Some(p) = self.positions.get(e) {
                        if chebyshev(p.x, p.y, x, y) <= radius {
                            out.push(*e);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(map: i32, x: i32, y: i32) -> Pos {
        Pos { map, x, y }
    }

    #[test]
    fn test_query_filters_by_chebyshev_and_map() {
        let mut g = AoiGrid::new();
        g.insert(EntityRef::Npc(1), pos(4, 100, 100));
        g.insert(EntityRef::Npc(2), pos(4, 115, 85));
        g.insert(EntityRef::Npc(3), pos(4, 116, 100));
        g.insert(EntityRef::Npc(4), pos(5, 100, 100));
        let mut got = g.query(4, 100, 100, SCREEN_RADIUS);
        got.sort();
        assert_eq!(got, vec![EntityRef::Npc(1), EntityRef::Npc(2)]);
    }

    #[test]
    fn test_query_crosses_bucket_edges() {
        let mut g = AoiGrid::new();
        g.insert(EntityRef::Player(9), pos(4, 47, 47));
        assert_eq!(g.query(4, 33, 33, SCREEN_RADIUS), vec![EntityRef::Player(9)]);
        assert!(g.query(4, 31, 33, SCREEN_RADIUS).is_empty());
    }

    #[test]
    fn test_update_within_bucket_keeps_index() {
        let mut g = AoiGrid::new();
        let e = EntityRef::Player(1);
        g.insert(e, pos(4, 1, 1));
        g.update(e, pos(4, 2, 2));
        assert_eq!(g.bucket_count(), 1);
        assert_eq!(g.position(e), Some(pos(4, 2, 2)));
        g.update(e, pos(4, 40, 40));
        assert_eq!(g.bucket_count(), 1);
        assert_eq!(g.query(4, 40, 40, 0), vec![e]);
        assert!(g.query(4, 1, 1, 2).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut g = AoiGrid::new();
        g.insert(EntityRef::Ground(5), pos(4, -3, -3));
        assert_eq!(g.remove(EntityRef::Ground(5)), Some(pos(4, -3, -3)));
        assert!(g.is_empty());
        assert_eq!(g.bucket_count(), 0);
        assert_eq!(g.remove(EntityRef::Ground(5)), None);
    }
}
