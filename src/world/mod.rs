//! Authoritative in-memory world state.
//!
//! One `WorldState` lives behind a `tokio::sync::RwLock` for the whole
//! process. Handlers take the write lock for one opcode's mutations, the
//! tick takes it for each phase. Nothing in here performs I/O; packets are
//! only queued on session channels.

pub mod aoi;
pub mod clan;
pub mod entities;
pub mod ids;
pub mod inventory;
pub mod known;
pub mod party;
pub mod player;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::database::mob_db::NpcKind;
use crate::database::Content;
use aoi::{AoiGrid, EntityRef, Pos, SCREEN_RADIUS};
use clan::ClanRegistry;
use entities::{Companion, Door, GroundItem, Npc};
use ids::IdAllocator;
use known::KnownKind;
use party::PartyRegistry;
use player::Player;

pub type SharedWorld = Arc<tokio::sync::RwLock<WorldState>>;

pub struct WorldState {
    pub content: Arc<Content>,
    pub ids: IdAllocator,
    players: HashMap<u64, Player>,
    by_char: HashMap<i32, u64>,
    by_name: HashMap<String, u64>,
    pub npcs: HashMap<u32, Npc>,
    pub ground: HashMap<u32, GroundItem>,
    pub doors: HashMap<u32, Door>,
    pub companions: HashMap<u32, Companion>,
    pub grid: AoiGrid,
    pub parties: PartyRegistry,
    pub clans: ClanRegistry,
    pub weather: u8,
    pub tick: u64,
    /// Sessions whose view must be re-synced in the broadcast phase
    pub aoi_dirty: BTreeSet<u64>,
    yes_no_counter: i32,
    next_emblem: i32,
}

impl WorldState {
    pub fn new(content: Arc<Content>) -> Self {
        Self {
            content,
            ids: IdAllocator::new(),
            players: HashMap::new(),
            by_char: HashMap::new(),
            by_name: HashMap::new(),
            npcs: HashMap::new(),
            ground: HashMap::new(),
            doors: HashMap::new(),
            companions: HashMap::new(),
            grid: AoiGrid::new(),
            parties: PartyRegistry::new(),
            clans: ClanRegistry::new(),
            weather: 0,
            tick: 0,
            aoi_dirty: BTreeSet::new(),
            yes_no_counter: 0,
            next_emblem: 0,
        }
    }

    pub fn shared(self) -> SharedWorld {
        Arc::new(tokio::sync::RwLock::new(self))
    }

    /// Place every configured spawn. Door templates become closed doors.
    /// Returns the number of entities placed.
    pub fn spawn_npcs(&mut self) -> usize {
        let content = Arc::clone(&self.content);
        let mut placed = 0;
        for sp in content.npcs.spawns() {
            let Some(t) = content.npcs.get(sp.npc) else {
                tracing::warn!("[world] [spawn_unknown_npc] npc={} map={}", sp.npc, sp.map);
                continue;
            };
            if t.kind == NpcKind::Door {
                let door = Door { obj_id: self.ids.next_object(), gfx: t.gfx, x: sp.x, y: sp.y, map: sp.map, open: false };
                self.add_door(door);
                placed += 1;
                continue;
            }
            for _ in 0..sp.count.max(1) {
                let npc = Npc::spawn(self.ids.next_object(), t, sp);
                self.add_npc(npc);
                placed += 1;
            }
        }
        placed
    }

    // ============================================
    // Players
    // ============================================

    /// Insert a player and mark its tile. Fails when the session or
    /// character is already present.
    pub fn add_player(&mut self, p: Player) -> Result<(), Player> {
        if self.players.contains_key(&p.session_id) || self.by_char.contains_key(&p.char_id) {
            return Err(p);
        }
        let sid = p.session_id;
        self.by_char.insert(p.char_id, sid);
        self.by_name.insert(p.name.to_lowercase(), sid);
        self.grid.insert(EntityRef::Player(sid), Pos { map: p.map, x: p.x, y: p.y });
        if !p.dead {
            self.content.maps.set_impassable(p.map, p.x, p.y, true);
        }
        self.players.insert(sid, p);
        Ok(())
    }

    /// Remove a player, clearing every index and its tile mark together.
    pub fn remove_player(&mut self, session_id: u64) -> Option<Player> {
        let p = self.players.remove(&session_id)?;
        self.by_char.remove(&p.char_id);
        self.by_name.remove(&p.name.to_lowercase());
        self.grid.remove(EntityRef::Player(session_id));
        if !p.dead {
            self.content.maps.set_impassable(p.map, p.x, p.y, false);
        }
        Some(p)
    }

    pub fn player(&self, session_id: u64) -> Option<&Player> {
        self.players.get(&session_id)
    }

    pub fn player_mut(&mut self, session_id: u64) -> Option<&mut Player> {
        self.players.get_mut(&session_id)
    }

    /// Two distinct players at once.
    pub fn player_pair_mut(&mut self, a: u64, b: u64) -> Option<(&mut Player, &mut Player)> {
        if a == b {
            return None;
        }
        match self.players.get_disjoint_mut([&a, &b]) {
            [Some(pa), Some(pb)] => Some((pa, pb)),
            _ => None,
        }
    }

    pub fn session_of_char(&self, char_id: i32) -> Option<u64> {
        self.by_char.get(&char_id).copied()
    }

    pub fn player_by_char(&self, char_id: i32) -> Option<&Player> {
        self.session_of_char(char_id).and_then(|s| self.players.get(&s))
    }

    pub fn player_by_char_mut(&mut self, char_id: i32) -> Option<&mut Player> {
        let sid = self.session_of_char(char_id)?;
        self.players.get_mut(&sid)
    }

    pub fn session_of_name(&self, name: &str) -> Option<u64> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.session_of_name(name).and_then(|s| self.players.get(&s))
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn session_ids(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.players.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Move a player, keeping the tile overlay and spatial index in step.
    pub fn update_position(&mut self, session_id: u64, x: i32, y: i32, map: i32, heading: u8) -> bool {
        let Some(p) = self.players.get_mut(&session_id) else {
            return false;
        };
        if !p.dead {
            self.content.maps.set_impassable(p.map, p.x, p.y, false);
            self.content.maps.set_impassable(map, x, y, true);
        }
        p.x = x;
        p.y = y;
        p.map = map;
        p.heading = heading & 7;
        self.grid.update(EntityRef::Player(session_id), Pos { map, x, y });
        true
    }

    /// Clear or restore a player's tile mark around death and respawn.
    pub fn set_player_dead(&mut self, session_id: u64, dead: bool) {
        let Some(p) = self.players.get_mut(&session_id) else {
            return;
        };
        if p.dead == dead {
            return;
        }
        p.dead = dead;
        self.content.maps.set_impassable(p.map, p.x, p.y, !dead);
    }

    // ============================================
    // NPCs, ground items, doors, companions
    // ============================================

    pub fn add_npc(&mut self, npc: Npc) {
        let id = npc.obj_id;
        self.grid.insert(EntityRef::Npc(id), Pos { map: npc.map, x: npc.x, y: npc.y });
        if !npc.dead {
            self.content.maps.set_impassable(npc.map, npc.x, npc.y, true);
        }
        self.npcs.insert(id, npc);
    }

    pub fn move_npc(&mut self, obj_id: u32, x: i32, y: i32, heading: u8) -> bool {
        let Some(npc) = self.npcs.get_mut(&obj_id) else {
            return false;
        };
        self.content.maps.set_impassable(npc.map, npc.x, npc.y, false);
        self.content.maps.set_impassable(npc.map, x, y, true);
        npc.x = x;
        npc.y = y;
        npc.heading = heading & 7;
        self.grid.update(EntityRef::Npc(obj_id), Pos { map: npc.map, x, y });
        true
    }

    /// Mark an NPC dead and free its tile. The corpse stays indexed.
    pub fn kill_npc(&mut self, obj_id: u32) {
        if let Some(npc) = self.npcs.get_mut(&obj_id) {
            if !npc.dead {
                npc.dead = true;
                npc.hp = 0;
                npc.target = None;
                npc.hate.clear();
                npc.respawn_countdown = npc.respawn_ticks;
                self.content.maps.set_impassable(npc.map, npc.x, npc.y, false);
            }
        }
    }

    /// Bring a dead NPC back at its spawn point.
    pub fn respawn_npc(&mut self, obj_id: u32) {
        let Some(npc) = self.npcs.get_mut(&obj_id) else {
            return;
        };
        let (x, y, map) = npc.spawn;
        npc.dead = false;
        npc.hp = npc.max_hp;
        npc.x = x;
        npc.y = y;
        npc.map = map;
        self.content.maps.set_impassable(map, x, y, true);
        self.grid.update(EntityRef::Npc(obj_id), Pos { map, x, y });
    }

    pub fn add_ground(&mut self, item: GroundItem) {
        let id = item.obj_id();
        self.grid.insert(EntityRef::Ground(id), Pos { map: item.map, x: item.x, y: item.y });
        self.ground.insert(id, item);
    }

    pub fn remove_ground(&mut self, obj_id: u32) -> Option<GroundItem> {
        let g = self.ground.remove(&obj_id)?;
        self.grid.remove(EntityRef::Ground(obj_id));
        Some(g)
    }

    pub fn add_door(&mut self, door: Door) {
        self.grid.insert(EntityRef::Door(door.obj_id), Pos { map: door.map, x: door.x, y: door.y });
        if !door.open {
            self.content.maps.set_impassable(door.map, door.x, door.y, true);
        }
        self.doors.insert(door.obj_id, door);
    }

    pub fn add_companion(&mut self, c: Companion) {
        self.grid.insert(EntityRef::Companion(c.obj_id), Pos { map: c.map, x: c.x, y: c.y });
        self.companions.insert(c.obj_id, c);
    }

    pub fn remove_companion(&mut self, obj_id: u32) -> Option<Companion> {
        let c = self.companions.remove(&obj_id)?;
        self.grid.remove(EntityRef::Companion(obj_id));
        Some(c)
    }

    pub fn move_companion(&mut self, obj_id: u32, x: i32, y: i32, map: i32, heading: u8) {
        if let Some(c) = self.companions.get_mut(&obj_id) {
            c.x = x;
            c.y = y;
            c.map = map;
            c.heading = heading & 7;
            self.grid.update(EntityRef::Companion(obj_id), Pos { map, x, y });
        }
    }

    pub fn companions_of(&self, char_id: i32) -> Vec<u32> {
        let mut v: Vec<u32> = self.companions.values().filter(|c| c.owner_char == char_id).map(|c| c.obj_id).collect();
        v.sort_unstable();
        v
    }

    // ============================================
    // Spatial queries
    // ============================================

    /// Sessions of players within screen range, sorted.
    pub fn nearby_players(&self, map: i32, x: i32, y: i32, exclude: u64) -> Vec<u64> {
        self.nearby_players_within(map, x, y, SCREEN_RADIUS, exclude)
    }

    pub fn nearby_players_within(&self, map: i32, x: i32, y: i32, radius: i32, exclude: u64) -> Vec<u64> {
        let mut v: Vec<u64> = self
            .grid
            .query(map, x, y, radius)
            .into_iter()
            .filter_map(|e| match e {
                EntityRef::Player(s) if s != exclude => Some(s),
                _ => None,
            })
            .collect();
        v.sort_unstable();
        v
    }

    pub fn nearby_npcs(&self, map: i32, x: i32, y: i32, radius: i32) -> Vec<u32> {
        self.nearby_of(map, x, y, radius, |e| match e {
            EntityRef::Npc(id) => Some(id),
            _ => None,
        })
    }

    pub fn nearby_ground(&self, map: i32, x: i32, y: i32, radius: i32) -> Vec<u32> {
        self.nearby_of(map, x, y, radius, |e| match e {
            EntityRef::Ground(id) => Some(id),
            _ => None,
        })
    }

    pub fn nearby_doors(&self, map: i32, x: i32, y: i32, radius: i32) -> Vec<u32> {
        self.nearby_of(map, x, y, radius, |e| match e {
            EntityRef::Door(id) => Some(id),
            _ => None,
        })
    }

    pub fn nearby_companions(&self, map: i32, x: i32, y: i32, radius: i32) -> Vec<u32> {
        self.nearby_of(map, x, y, radius, |e| match e {
            EntityRef::Companion(id) => Some(id),
            _ => None,
        })
    }

    fn nearby_of(&self, map: i32, x: i32, y: i32, radius: i32, pick: impl Fn(EntityRef) -> Option<u32>) -> Vec<u32> {
        let mut v: Vec<u32> = self.grid.query(map, x, y, radius).into_iter().filter_map(pick).collect();
        v.sort_unstable();
        v
    }

    /// Client-facing object id of an entity.
    pub fn object_id(&self, e: EntityRef) -> Option<u32> {
        match e {
            EntityRef::Player(s) => self.players.get(&s).map(|p| p.object_id()),
            EntityRef::Npc(id) | EntityRef::Ground(id) | EntityRef::Door(id) | EntityRef::Companion(id) => Some(id),
        }
    }

    /// Resolve a client object id to an entity.
    pub fn entity_by_object(&self, obj_id: u32) -> Option<EntityRef> {
        if let Some(s) = self.by_char.get(&(obj_id as i32)) {
            return Some(EntityRef::Player(*s));
        }
        if self.npcs.contains_key(&obj_id) {
            return Some(EntityRef::Npc(obj_id));
        }
        if self.ground.contains_key(&obj_id) {
            return Some(EntityRef::Ground(obj_id));
        }
        if self.doors.contains_key(&obj_id) {
            return Some(EntityRef::Door(obj_id));
        }
        if self.companions.contains_key(&obj_id) {
            return Some(EntityRef::Companion(obj_id));
        }
        None
    }

    /// Everything `viewer` should currently display: `(object id, kind, x, y)`.
    pub fn visible_to(&self, viewer: u64) -> Vec<(u32, KnownKind, i32, i32)> {
        let Some(me) = self.players.get(&viewer) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for e in self.grid.query(me.map, me.x, me.y, SCREEN_RADIUS) {
            match e {
                EntityRef::Player(s) if s == viewer => {}
                EntityRef::Player(s) => {
                    if let Some(p) = self.players.get(&s) {
                        if !p.is_invisible() {
                            out.push((p.object_id(), KnownKind::Player, p.x, p.y));
                        }
                    }
                }
                EntityRef::Npc(id) => {
                    if let Some(n) = self.npcs.get(&id) {
                        out.push((id, KnownKind::Npc, n.x, n.y));
                    }
                }
                EntityRef::Ground(id) => {
                    if let Some(g) = self.ground.get(&id) {
                        out.push((id, KnownKind::Ground, g.x, g.y));
                    }
                }
                EntityRef::Door(id) => {
                    if let Some(d) = self.doors.get(&id) {
                        out.push((id, KnownKind::Door, d.x, d.y));
                    }
                }
                EntityRef::Companion(id) => {
                    if let Some(c) = self.companions.get(&id) {
                        out.push((id, KnownKind::Companion, c.x, c.y));
                    }
                }
            }
        }
        out.sort_unstable_by_key(|(id, ..)| *id);
        out
    }

    // ============================================
    // Broadcast helpers
    // ============================================

    pub fn send_to(&self, session_id: u64, pkt: Bytes) {
        if let Some(p) = self.players.get(&session_id) {
            p.session.send(pkt);
        }
    }

    /// Queue one packet for every player in screen range of (map, x, y).
    pub fn broadcast_near(&self, map: i32, x: i32, y: i32, exclude: u64, pkt: &Bytes) {
        for s in self.nearby_players(map, x, y, exclude) {
            self.send_to(s, pkt.clone());
        }
    }

    /// Broadcast to everyone who sees `session_id`, and to the player itself.
    pub fn broadcast_with_self(&self, session_id: u64, pkt: &Bytes) {
        let Some(p) = self.players.get(&session_id) else {
            return;
        };
        p.session.send(pkt.clone());
        self.broadcast_near(p.map, p.x, p.y, session_id, pkt);
    }

    pub fn broadcast_all(&self, pkt: &Bytes) {
        for p in self.players.values() {
            p.session.send(pkt.clone());
        }
    }

    /// Queue a view re-sync for every player who can see (map, x, y).
    pub fn mark_dirty_near(&mut self, map: i32, x: i32, y: i32) {
        let near = self.nearby_players(map, x, y, 0);
        self.aoi_dirty.extend(near);
    }

    pub fn take_dirty(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.aoi_dirty).into_iter().collect()
    }

    /// Open or close a door, keeping its tile mark in step.
    pub fn set_door_open(&mut self, obj_id: u32, open: bool) -> bool {
        let Some(d) = self.doors.get_mut(&obj_id) else {
            return false;
        };
        if d.open == open {
            return false;
        }
        d.open = open;
        self.content.maps.set_impassable(d.map, d.x, d.y, !open);
        true
    }

    pub fn next_yes_no(&mut self) -> i32 {
        self.yes_no_counter = self.yes_no_counter.wrapping_add(1);
        self.yes_no_counter
    }

    pub fn next_emblem_id(&mut self) -> i32 {
        self.next_emblem = self.next_emblem.max(self.clans.max_emblem_id()) + 1;
        self.next_emblem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::player::test_support::player;

    fn world() -> WorldState {
        WorldState::new(Arc::new(Content::default()))
    }

    #[test]
    fn test_add_remove_keeps_indexes_in_sync() {
        let mut w = world();
        let (p, _rx) = player(1, 100, "Alice");
        assert!(w.add_player(p).is_ok());
        assert_eq!(w.session_of_char(100), Some(1));
        assert_eq!(w.session_of_name("ALICE"), Some(1));
        assert_eq!(w.content.maps.occupied_count(4, 32768, 32768), 1);

        let (dup, _rx2) = player(2, 100, "Other");
        assert!(w.add_player(dup).is_err());

        let p = w.remove_player(1).unwrap();
        assert_eq!(p.char_id, 100);
        assert!(w.session_of_char(100).is_none());
        assert!(w.session_of_name("alice").is_none());
        assert!(w.grid.is_empty());
        assert_eq!(w.content.maps.occupied_count(4, 32768, 32768), 0);
    }

    #[test]
    fn test_update_position_moves_tile_mark() {
        let mut w = world();
        let (p, _rx) = player(1, 100, "Alice");
        w.add_player(p).unwrap();
        assert!(w.update_position(1, 32769, 32768, 4, 2));
        assert_eq!(w.content.maps.occupied_count(4, 32768, 32768), 0);
        assert_eq!(w.content.maps.occupied_count(4, 32769, 32768), 1);
        assert!(!w.update_position(9, 0, 0, 4, 0));
    }

    #[test]
    fn test_nearby_players_excludes_self_and_far() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, _rb) = player(2, 101, "Bob");
        let (mut c, _rc) = player(3, 102, "Carol");
        b.x += 15;
        c.x += 16;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        w.add_player(c).unwrap();
        assert_eq!(w.nearby_players(4, 32768, 32768, 1), vec![2]);
    }

    #[test]
    fn test_visible_to_hides_invisible_players() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, _rb) = player(2, 101, "Bob");
        b.timers.invis = 10;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        assert!(w.visible_to(1).is_empty());
        w.player_mut(2).unwrap().timers.invis = 0;
        assert_eq!(w.visible_to(1).len(), 1);
    }

    #[test]
    fn test_dirty_set_collects_viewers() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, _rb) = player(2, 101, "Bob");
        b.x += 30;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        w.mark_dirty_near(4, 32768, 32770);
        assert_eq!(w.take_dirty(), vec![1]);
        assert!(w.take_dirty().is_empty());
    }

    #[test]
    fn test_door_toggle_marks_tile() {
        let mut w = world();
        w.add_door(Door { obj_id: 9, gfx: 1, x: 10, y: 10, map: 4, open: false });
        assert_eq!(w.content.maps.occupied_count(4, 10, 10), 1);
        assert!(w.set_door_open(9, true));
        assert!(!w.set_door_open(9, true));
        assert_eq!(w.content.maps.occupied_count(4, 10, 10), 0);
    }

    #[test]
    fn test_player_pair_mut() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (b, _rb) = player(2, 101, "Bob");
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        let (pa, pb) = w.player_pair_mut(1, 2).unwrap();
        pa.level = 50;
        pb.level = 51;
        assert!(w.player_pair_mut(1, 1).is_none());
        assert!(w.player_pair_mut(1, 9).is_none());
    }
}
