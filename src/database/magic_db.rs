//! Skill templates.

use std::collections::HashMap;

use serde::Deserialize;

use super::ContentError;
use crate::game::types::StatDelta;

/// Skill ids with special handling in the core.
pub const SKILL_TELEPORT: i32 = 5;
pub const SKILL_MASS_TELEPORT: i32 = 69;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkillTarget {
    /// Damage on an enemy
    Attack,
    /// Buff on a player (self when targetless)
    Buff,
    /// Heal on a player
    Heal,
    #[default]
    SelfOnly,
    Teleport,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillTemplate {
    pub id: i32,
    pub name: String,
    /// 1-based row in the client's spell book
    #[serde(default)]
    pub level: i32,
    /// Bit within the row byte
    #[serde(default)]
    pub id_bitmask: u8,
    #[serde(default)]
    pub target: SkillTarget,
    #[serde(default)]
    pub mp_consume: i32,
    #[serde(default)]
    pub hp_consume: i32,
    #[serde(default)]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub range: i32,
    /// Buff duration in seconds
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub cast_gfx: u16,
    /// Buff icon / status kind sent when the buff starts or ends
    #[serde(default)]
    pub icon: u8,
    /// Damage for attack skills, amount for heals
    #[serde(default)]
    pub power: i32,
    /// Stat change applied while the buff lasts
    #[serde(default)]
    pub delta: StatDelta,
    #[serde(default)]
    pub haste: bool,
    #[serde(default)]
    pub brave: bool,
    #[serde(default)]
    pub invisible: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SkillFile {
    #[serde(default)]
    pub skills: Vec<SkillTemplate>,
}

#[derive(Debug, Default)]
pub struct SkillTable {
    skills: HashMap<i32, SkillTemplate>,
}

impl SkillTable {
    pub fn from_file(file: SkillFile) -> Result<Self, ContentError> {
        let mut skills = HashMap::with_capacity(file.skills.len());
        for skill in file.skills {
            let id = skill.id;
            if skills.insert(id, skill).is_some() {
                return Err(ContentError::Duplicate { table: "skill", id });
            }
        }
        Ok(Self { skills })
    }

    pub fn get(&self, id: i32) -> Option<&SkillTemplate> {
        self.skills.get(&id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// 32-byte spell book bitmap for the known skills.
    pub fn spell_bitmap(&self, known: &[i32]) -> [u8; 32] {
        let mut slots = [0u8; 32];
        for sk in known.iter().filter_map(|id| self.get(*id)) {
            if (1..=32).contains(&sk.level) {
                slots[(sk.level - 1) as usize] |= sk.id_bitmask;
            }
        }
        slots
    }
}

/// Skill id encoded by a spell book (row, column) pair.
pub fn skill_id_from_slot(row: u8, column: u8) -> i32 {
    row as i32 * 8 + column as i32 + 1
}
