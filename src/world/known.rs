//! Per-player record of which objects the client currently displays.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownKind {
    Player,
    Npc,
    Ground,
    Door,
    Companion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownEntry {
    pub kind: KnownKind,
    pub x: i32,
    pub y: i32,
}

/// One AOI decision for a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Appear(u32),
    Moved(u32),
    Vanish(u32),
}

#[derive(Debug, Default, Clone)]
pub struct KnownSet {
    entries: HashMap<u32, KnownEntry>,
}

impl KnownSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&KnownEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, kind: KnownKind, x: i32, y: i32) {
        self.entries.insert(id, KnownEntry { kind, x, y });
    }

    pub fn remove(&mut self, id: u32) -> Option<KnownEntry> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Record what is visible now and report the difference.
    ///
    /// `visible` holds every object in range: `(id, kind, x, y)`.
    pub fn refresh(&mut self, visible: &[(u32, KnownKind, i32, i32)]) -> Vec<ViewChange> {
        let mut changes = Vec::new();
        let mut seen = std::collections::HashSet::with_capacity(visible.len());
        for &(id, kind, x, y) in visible {
            seen.insert(id);
            match self.entries.get_mut(&id) {
                None => {
                    self.entries.insert(id, KnownEntry { kind, x, y });
                    changes.push(ViewChange::Appear(id));
                }
                Some(e) if e.x != x || e.y != y => {
                    e.x = x;
                    e.y = y;
                    changes.push(ViewChange::Moved(id));
                }
                Some(_) => {}
            }
        }
        let gone: Vec<u32> = self.entries.keys().copied().filter(|id| !seen.contains(id)).collect();
        for id in gone {
            self.entries.remove(&id);
            changes.push(ViewChange::Vanish(id));
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_appear_move_vanish() {
        let mut k = KnownSet::new();
        let c = k.refresh(&[(1, KnownKind::Npc, 10, 10), (2, KnownKind::Player, 11, 11)]);
        assert_eq!(c.len(), 2);
        assert!(c.contains(&ViewChange::Appear(1)));

        let c = k.refresh(&[(1, KnownKind::Npc, 10, 11)]);
        assert!(c.contains(&ViewChange::Moved(1)));
        assert!(c.contains(&ViewChange::Vanish(2)));
        assert_eq!(k.len(), 1);

        let c = k.refresh(&[(1, KnownKind::Npc, 10, 11)]);
        assert!(c.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut k = KnownSet::new();
        k.insert(5, KnownKind::Ground, 1, 1);
        k.clear();
        assert!(k.is_empty());
        assert!(!k.contains(5));
    }
}
