//! Map metadata, passability and timed-map groups.
//!
//! Static passability comes from `maps.yaml`. Live entities mark the tile
//! they stand on through an occupancy overlay so NPC pathing routes around
//! them. Occupancy is reference counted per tile.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Deserialize;

use super::ContentError;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapInfo {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    pub start_x: i32,
    pub end_x: i32,
    pub start_y: i32,
    pub end_y: i32,
    /// Bookmark teleport out is allowed
    #[serde(default = "default_true")]
    pub escapable: bool,
    /// Random teleport is allowed
    #[serde(default = "default_true")]
    pub teleportable: bool,
    /// Bookmarks may be saved here
    #[serde(default = "default_true")]
    pub markable: bool,
    #[serde(default)]
    pub underwater: bool,
    /// Statically blocked tiles as `[x, y]`
    #[serde(default)]
    pub blocked: Vec<[i32; 2]>,
}

impl MapInfo {
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= self.start_x && x <= self.end_x && y >= self.start_y && y <= self.end_y
    }
}

/// Group of maps sharing a daily time quota.
#[derive(Debug, Clone, Deserialize)]
pub struct TimedMapGroup {
    pub id: i32,
    pub name: String,
    pub max_secs: i32,
    pub maps: Vec<i32>,
    pub exit_x: i32,
    pub exit_y: i32,
    pub exit_map: i32,
    pub exit_heading: u8,
}

fn group(id: i32, name: &str, maps: Vec<i32>) -> TimedMapGroup {
    TimedMapGroup {
        id,
        name: name.to_string(),
        max_secs: 7200,
        maps,
        exit_x: 33443,
        exit_y: 32800,
        exit_map: 4,
        exit_heading: 5,
    }
}

/// The stock 3.80C timed-map groups.
pub fn default_timed_groups() -> Vec<TimedMapGroup> {
    vec![
        group(1, "龍之谷地監", (560..=566).collect()),
        group(2, "奇岩/古魯丁地監", (807..=813).chain(567..=570).collect()),
        group(3, "象牙塔", (280..=289).collect()),
        group(4, "新遺忘之島", vec![1700]),
        group(5, "新傲慢之塔", (3301..=3310).chain([7100]).collect()),
        group(6, "拉斯塔巴德地監", vec![633]),
    ]
}

/// A tile that moves whoever steps on it.
#[derive(Debug, Clone, Deserialize)]
pub struct Portal {
    pub map: i32,
    pub x: i32,
    pub y: i32,
    pub dst_x: i32,
    pub dst_y: i32,
    pub dst_map: i32,
    #[serde(default)]
    pub heading: u8,
    #[serde(default)]
    pub note: String,
}

/// A paid destination offered by a teleporter NPC, keyed by its dialog action.
#[derive(Debug, Clone, Deserialize)]
pub struct TeleportDest {
    pub npc_id: i32,
    pub action: String,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    #[serde(default)]
    pub heading: u8,
    #[serde(default)]
    pub price: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct MapFile {
    #[serde(default)]
    pub maps: Vec<MapInfo>,
    /// Overrides the stock groups when present
    #[serde(default)]
    pub timed_groups: Option<Vec<TimedMapGroup>>,
    #[serde(default)]
    pub portals: Vec<Portal>,
    #[serde(default)]
    pub teleports: Vec<TeleportDest>,
}

#[derive(Debug, Default)]
pub struct MapTable {
    maps: HashMap<i32, MapInfo>,
    blocked: HashSet<(i32, i32, i32)>,
    occupied: Mutex<HashMap<(i32, i32, i32), u16>>,
    groups: Vec<TimedMapGroup>,
    group_by_map: HashMap<i32, usize>,
    portals: HashMap<(i32, i32, i32), Portal>,
    teleports: HashMap<(i32, String), TeleportDest>,
}

impl MapTable {
    pub fn from_file(file: MapFile) -> Result<Self, ContentError> {
        let mut maps = HashMap::with_capacity(file.maps.len());
        let mut blocked = HashSet::new();
        for info in file.maps {
            let id = info.id;
            for [x, y] in &info.blocked {
                blocked.insert((id, *x, *y));
            }
            if maps.insert(id, info).is_some() {
                return Err(ContentError::Duplicate { table: "map", id });
            }
        }
        let groups = file.timed_groups.unwrap_or_else(default_timed_groups);
        let mut group_by_map = HashMap::new();
        for (idx, g) in groups.iter().enumerate() {
            for m in &g.maps {
                group_by_map.insert(*m, idx);
            }
        }
        let portals = file.portals.into_iter().map(|p| ((p.map, p.x, p.y), p)).collect();
        let teleports = file
            .teleports
            .into_iter()
            .map(|t| ((t.npc_id, t.action.to_lowercase()), t))
            .collect();
        Ok(Self {
            maps,
            blocked,
            occupied: Mutex::new(HashMap::new()),
            groups,
            group_by_map,
            portals,
            teleports,
        })
    }

    pub fn get(&self, map: i32) -> Option<&MapInfo> {
        self.maps.get(&map)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Unknown maps are treated as unbounded.
    pub fn is_in_map(&self, map: i32, x: i32, y: i32) -> bool {
        self.get(map).map(|m| m.in_bounds(x, y)).unwrap_or(true)
    }

    /// Static passability only.
    pub fn is_static_passable(&self, map: i32, x: i32, y: i32) -> bool {
        self.is_in_map(map, x, y) && !self.blocked.contains(&(map, x, y))
    }

    /// Static passability and no live entity on the tile.
    pub fn is_passable(&self, map: i32, x: i32, y: i32) -> bool {
        if !self.is_static_passable(map, x, y) {
            return false;
        }
        let occupied = self.occupied.lock().unwrap_or_else(|e| e.into_inner());
        !occupied.contains_key(&(map, x, y))
    }

    /// Mark (or unmark) a tile as held by a live entity.
    pub fn set_impassable(&self, map: i32, x: i32, y: i32, impassable: bool) {
        let mut occupied = self.occupied.lock().unwrap_or_else(|e| e.into_inner());
        let key = (map, x, y);
        if impassable {
            *occupied.entry(key).or_insert(0) += 1;
        } else if let Some(n) = occupied.get_mut(&key) {
            *n -= 1;
            if *n == 0 {
                occupied.remove(&key);
            }
        }
    }

    pub fn occupied_count(&self, map: i32, x: i32, y: i32) -> u16 {
        let occupied = self.occupied.lock().unwrap_or_else(|e| e.into_inner());
        occupied.get(&(map, x, y)).copied().unwrap_or(0)
    }

    pub fn is_escapable(&self, map: i32) -> bool {
        self.get(map).map(|m| m.escapable).unwrap_or(true)
    }

    pub fn is_teleportable(&self, map: i32) -> bool {
        self.get(map).map(|m| m.teleportable).unwrap_or(true)
    }

    pub fn is_markable(&self, map: i32) -> bool {
        self.get(map).map(|m| m.markable).unwrap_or(true)
    }

    pub fn is_underwater(&self, map: i32) -> bool {
        self.get(map).map(|m| m.underwater).unwrap_or(false)
    }

    pub fn timed_group(&self, map: i32) -> Option<&TimedMapGroup> {
        self.group_by_map.get(&map).map(|&i| &self.groups[i])
    }

    pub fn timed_groups(&self) -> &[TimedMapGroup] {
        &self.groups
    }

    pub fn portal(&self, map: i32, x: i32, y: i32) -> Option<&Portal> {
        self.portals.get(&(map, x, y))
    }

    /// Destination behind an NPC dialog action. Actions match case-insensitively.
    pub fn teleport(&self, npc_id: i32, action: &str) -> Option<&TeleportDest> {
        self.teleports.get(&(npc_id, action.to_lowercase()))
    }
}
