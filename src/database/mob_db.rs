//! NPC templates and spawn points.

use std::collections::HashMap;

use serde::Deserialize;

use super::ContentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NpcKind {
    #[default]
    Monster,
    Merchant,
    Warehouse,
    Teleporter,
    Guard,
    Door,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NpcSize {
    #[default]
    Small,
    Large,
}

fn default_move_ticks() -> u32 {
    4
}

fn default_attack_ticks() -> u32 {
    5
}

fn default_range() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpcTemplate {
    pub id: i32,
    pub name: String,
    /// Client string key, e.g. `$936`
    #[serde(default)]
    pub nameid: String,
    pub gfx: u16,
    #[serde(default)]
    pub kind: NpcKind,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub mp: i32,
    #[serde(default)]
    pub ac: i32,
    #[serde(default)]
    pub exp: i32,
    #[serde(default)]
    pub lawful: i32,
    #[serde(default)]
    pub size: NpcSize,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_range")]
    pub attack_range: i32,
    #[serde(default)]
    pub dmg_min: i32,
    #[serde(default)]
    pub dmg_max: i32,
    /// Ticks between steps
    #[serde(default = "default_move_ticks")]
    pub move_ticks: u32,
    /// Ticks between attacks
    #[serde(default = "default_attack_ticks")]
    pub attack_ticks: u32,
}

fn default_count() -> u32 {
    1
}

fn default_respawn() -> u32 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnPoint {
    pub npc: i32,
    pub map: i32,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub heading: u8,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Seconds until a dead spawn returns
    #[serde(default = "default_respawn")]
    pub respawn_secs: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct NpcFile {
    #[serde(default)]
    pub npcs: Vec<NpcTemplate>,
    #[serde(default)]
    pub spawns: Vec<SpawnPoint>,
}

#[derive(Debug, Default)]
pub struct NpcTable {
    npcs: HashMap<i32, NpcTemplate>,
    spawns: Vec<SpawnPoint>,
}

impl NpcTable {
    pub fn from_file(file: NpcFile) -> Result<Self, ContentError> {
        let mut npcs = HashMap::with_capacity(file.npcs.len());
        for npc in file.npcs {
            let id = npc.id;
            if npcs.insert(id, npc).is_some() {
                return Err(ContentError::Duplicate { table: "npc", id });
            }
        }
        let spawns = file
            .spawns
            .into_iter()
            .filter(|s| {
                let known = npcs.contains_key(&s.npc);
                if !known {
                    tracing::warn!("[content] [spawn_unknown_npc] npc={} map={}", s.npc, s.map);
                }
                known
            })
            .collect();
        Ok(Self { npcs, spawns })
    }

    pub fn get(&self, id: i32) -> Option<&NpcTemplate> {
        self.npcs.get(&id)
    }

    pub fn spawns(&self) -> &[SpawnPoint] {
        &self.spawns
    }

    pub fn len(&self) -> usize {
        self.npcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.npcs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawns_for_unknown_npcs_are_dropped() {
        let file: NpcFile = serde_yaml::from_str(
            r#"
npcs:
  - { id: 45000, name: goblin, gfx: 1000, hp: 20, aggressive: true }
spawns:
  - { npc: 45000, map: 4, x: 33000, y: 33000, count: 3 }
  - { npc: 1, map: 4, x: 1, y: 1 }
"#,
        )
        .unwrap();
        let t = NpcTable::from_file(file).unwrap();
        assert_eq!(t.spawns().len(), 1);
        assert_eq!(t.spawns()[0].count, 3);
        let goblin = t.get(45000).unwrap();
        assert!(goblin.aggressive);
        assert_eq!(goblin.attack_range, 1);
        assert_eq!(goblin.kind, NpcKind::Monster);
    }
}
