//! Small shared game types used by content tables, the world and the tick.

use serde::{Deserialize, Serialize};

/// Item id of adena (gold).
pub const ADENA_ITEM_ID: i32 = 40308;

/// x offset per client heading (0 = north, clockwise).
pub const HEADING_DX: [i32; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
/// y offset per client heading.
pub const HEADING_DY: [i32; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];

/// Tile distance on the 8-direction grid.
pub fn chebyshev(x1: i32, y1: i32, x2: i32, y2: i32) -> i32 {
    (x1 - x2).abs().max((y1 - y2).abs())
}

/// Heading from (x1, y1) looking at (x2, y2).
pub fn heading_to(x1: i32, y1: i32, x2: i32, y2: i32) -> u8 {
    let dx = (x2 - x1).signum();
    let dy = (y2 - y1).signum();
    (0..8u8)
        .find(|&h| HEADING_DX[h as usize] == dx && HEADING_DY[h as usize] == dy)
        .unwrap_or(0)
}

/// Item bless state as the client renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Bless {
    Blessed,
    #[default]
    Normal,
    Cursed,
    Sealed,
}

impl Bless {
    pub fn wire(self) -> u8 {
        match self {
            Bless::Blessed => 0,
            Bless::Normal => 1,
            Bless::Cursed => 2,
            Bless::Sealed => 128,
        }
    }

    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Bless::Blessed,
            2 => Bless::Cursed,
            128 => Bless::Sealed,
            _ => Bless::Normal,
        }
    }
}

/// Additive stat modifiers carried by equipment and buffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatDelta {
    #[serde(rename = "str")]
    pub str_: i32,
    pub dex: i32,
    pub con: i32,
    pub wis: i32,
    pub cha: i32,
    pub intel: i32,
    pub max_hp: i32,
    pub max_mp: i32,
    pub ac: i32,
    pub mr: i32,
    pub sp: i32,
    pub hit: i32,
    pub dmg: i32,
}

impl StatDelta {
    pub fn is_zero(&self) -> bool {
        *self == StatDelta::default()
    }

    pub fn add(&self, o: &StatDelta) -> StatDelta {
        StatDelta {
            str_: self.str_ + o.str_,
            dex: self.dex + o.dex,
            con: self.con + o.con,
            wis: self.wis + o.wis,
            cha: self.cha + o.cha,
            intel: self.intel + o.intel,
            max_hp: self.max_hp + o.max_hp,
            max_mp: self.max_mp + o.max_mp,
            ac: self.ac + o.ac,
            mr: self.mr + o.mr,
            sp: self.sp + o.sp,
            hit: self.hit + o.hit,
            dmg: self.dmg + o.dmg,
        }
    }

    pub fn neg(&self) -> StatDelta {
        StatDelta::default().sub(self)
    }

    pub fn sub(&self, o: &StatDelta) -> StatDelta {
        StatDelta {
            str_: self.str_ - o.str_,
            dex: self.dex - o.dex,
            con: self.con - o.con,
            wis: self.wis - o.wis,
            cha: self.cha - o.cha,
            intel: self.intel - o.intel,
            max_hp: self.max_hp - o.max_hp,
            max_mp: self.max_mp - o.max_mp,
            ac: self.ac - o.ac,
            mr: self.mr - o.mr,
            sp: self.sp - o.sp,
            hit: self.hit - o.hit,
            dmg: self.dmg - o.dmg,
        }
    }
}

/// Character classes in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassType {
    Crown = 0,
    Knight = 1,
    Elf = 2,
    Wizard = 3,
    DarkElf = 4,
    DragonKnight = 5,
    Illusionist = 6,
}

impl ClassType {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => ClassType::Crown,
            1 => ClassType::Knight,
            2 => ClassType::Elf,
            3 => ClassType::Wizard,
            4 => ClassType::DarkElf,
            5 => ClassType::DragonKnight,
            6 => ClassType::Illusionist,
            _ => return None,
        })
    }

    /// Base graphic for (class, sex).
    pub fn gfx(self, sex: i32) -> i32 {
        const MALE: [i32; 7] = [0, 61, 138, 734, 2786, 6658, 6671];
        const FEMALE: [i32; 7] = [1, 48, 37, 1186, 2796, 6661, 6650];
        let idx = self as usize;
        if sex == 0 {
            MALE[idx]
        } else {
            FEMALE[idx]
        }
    }

    /// Starting (max HP, max MP).
    pub fn starting_pools(self) -> (i32, i32) {
        match self {
            ClassType::Crown => (14, 2),
            ClassType::Knight => (16, 1),
            ClassType::Elf => (15, 4),
            ClassType::Wizard => (12, 6),
            ClassType::DarkElf => (12, 3),
            ClassType::DragonKnight => (16, 2),
            ClassType::Illusionist => (14, 5),
        }
    }

    /// Minimum (str, dex, con, wis, cha, int) at creation.
    pub fn base_stats(self) -> [i32; 6] {
        match self {
            ClassType::Crown => [13, 10, 10, 11, 13, 10],
            ClassType::Knight => [16, 12, 14, 9, 12, 8],
            ClassType::Elf => [11, 12, 12, 12, 9, 12],
            ClassType::Wizard => [8, 7, 12, 12, 8, 12],
            ClassType::DarkElf => [12, 15, 8, 10, 9, 11],
            ClassType::DragonKnight => [13, 11, 14, 12, 8, 11],
            ClassType::Illusionist => [11, 10, 12, 12, 8, 12],
        }
    }

    /// Points the player distributes on top of `base_stats`.
    pub fn bonus_points(self) -> i32 {
        75 - self.base_stats().iter().sum::<i32>()
    }
}

/// Total of the six primary stats every new character must have.
pub const CREATE_STAT_TOTAL: i32 = 75;
