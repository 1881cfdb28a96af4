//! Non-player entities: NPCs, ground items, doors and companions.

use std::collections::HashMap;

use super::inventory::InvItem;
use crate::database::mob_db::{NpcKind, NpcTemplate, SpawnPoint};
use crate::core::secs_to_ticks;

#[derive(Debug, Clone)]
pub struct Npc {
    pub obj_id: u32,
    pub template_id: i32,
    pub name: String,
    pub nameid: String,
    pub gfx: u16,
    pub kind: NpcKind,
    pub level: i32,
    pub lawful: i32,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub heading: u8,
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub ac: i32,
    pub exp: i32,
    pub dead: bool,
    pub spawn: (i32, i32, i32),
    pub respawn_ticks: u32,
    /// Ticks left until respawn while dead; ticks left until the corpse
    /// vanishes is folded into the same counter
    pub respawn_countdown: u32,
    /// Session id of the current aggro target
    pub target: Option<u64>,
    /// Accumulated damage by session id
    pub hate: HashMap<u64, i32>,
    pub move_cooldown: u32,
    pub attack_cooldown: u32,
}

impl Npc {
    pub fn spawn(obj_id: u32, t: &NpcTemplate, sp: &SpawnPoint) -> Self {
        Self {
            obj_id,
            template_id: t.id,
            name: t.name.clone(),
            nameid: t.nameid.clone(),
            gfx: t.gfx,
            kind: t.kind,
            level: t.level,
            lawful: t.lawful,
            x: sp.x,
            y: sp.y,
            map: sp.map,
            heading: sp.heading,
            hp: t.hp,
            max_hp: t.hp.max(1),
            mp: t.mp,
            ac: t.ac,
            exp: t.exp,
            dead: false,
            spawn: (sp.x, sp.y, sp.map),
            respawn_ticks: secs_to_ticks(sp.respawn_secs as u64) as u32,
            respawn_countdown: 0,
            target: None,
            hate: HashMap::new(),
            move_cooldown: 0,
            attack_cooldown: 0,
        }
    }

    pub fn is_attackable(&self) -> bool {
        !self.dead && self.kind == NpcKind::Monster
    }

    /// Record damage and pick the top damage dealer as target.
    pub fn add_hate(&mut self, session_id: u64, amount: i32) {
        *self.hate.entry(session_id).or_insert(0) += amount.max(1);
        self.target = self
            .hate
            .iter()
            .max_by_key(|(sid, v)| (**v, std::cmp::Reverse(**sid)))
            .map(|(sid, _)| *sid);
    }

    pub fn forget(&mut self, session_id: u64) {
        self.hate.remove(&session_id);
        if self.target == Some(session_id) {
            self.target = None;
        }
    }

    pub fn hp_ratio(&self) -> u8 {
        ((self.hp.max(0) as i64 * 100) / self.max_hp.max(1) as i64) as u8
    }
}

/// An item lying on the ground.
#[derive(Debug, Clone)]
pub struct GroundItem {
    pub item: InvItem,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    /// Only this character may pick it up while `claim_ticks` > 0
    pub owner_char: i32,
    pub claim_ticks: u32,
    pub ttl_ticks: u32,
}

impl GroundItem {
    pub fn obj_id(&self) -> u32 {
        self.item.obj_id
    }

    pub fn can_pick_up(&self, char_id: i32) -> bool {
        self.owner_char == 0 || self.claim_ticks == 0 || self.owner_char == char_id
    }
}

#[derive(Debug, Clone)]
pub struct Door {
    pub obj_id: u32,
    pub gfx: u16,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub open: bool,
}

impl Door {
    /// Client door status byte.
    pub fn status(&self) -> u8 {
        if self.open {
            28
        } else {
            29
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionKind {
    Pet,
    Summon,
    Doll,
    Follower,
}

/// Pet menu commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    Aggressive,
    Defensive,
    #[default]
    Rest,
    Extend,
    Alert,
    Dismiss,
}

impl ControlMode {
    /// From the pet menu action byte.
    pub fn from_menu(action: u8) -> Option<Self> {
        Some(match action {
            1 => Self::Aggressive,
            2 => Self::Defensive,
            3 => Self::Rest,
            4 => Self::Extend,
            5 => Self::Alert,
            6 => Self::Dismiss,
            _ => return None,
        })
    }

    /// From the command string the pet dialog posts back.
    pub fn from_action(action: &str) -> Option<Self> {
        Some(match action {
            "aggressive" => Self::Aggressive,
            "defensive" => Self::Defensive,
            "stay" | "rest" => Self::Rest,
            "extend" => Self::Extend,
            "alert" => Self::Alert,
            "dismiss" => Self::Dismiss,
            _ => return None,
        })
    }

    /// Status byte shown on the pet window.
    pub fn status(self) -> u8 {
        match self {
            Self::Aggressive => 1,
            Self::Defensive => 2,
            Self::Rest => 3,
            Self::Extend => 4,
            Self::Alert => 5,
            Self::Dismiss => 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Companion {
    pub obj_id: u32,
    pub owner_char: i32,
    pub kind: CompanionKind,
    pub template_id: i32,
    pub name: String,
    pub gfx: u16,
    pub level: i32,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub heading: u8,
    pub hp: i32,
    pub max_hp: i32,
    pub mode: ControlMode,
    /// Item object id currently held, for pet equipment
    pub held_items: Vec<u32>,
}
