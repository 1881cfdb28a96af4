//! Live player entity.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::inventory::{InvItem, Inventory};
use super::known::KnownSet;
use crate::game::types::StatDelta;
use crate::persist::WarehouseRow;
use crate::session::Session;

/// Saved teleport location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: i32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub map: i32,
}

/// Status flags a buff may set for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffFlags {
    pub haste: bool,
    pub brave: bool,
    pub invisible: bool,
}

impl BuffFlags {
    pub fn any(&self) -> bool {
        self.haste || self.brave || self.invisible
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBuff {
    pub skill_id: i32,
    pub remaining_ticks: u32,
    /// Exactly what was added to the live stats when the buff started
    pub delta: StatDelta,
    pub flags: BuffFlags,
    pub icon: u8,
}

/// Context of the yes-no prompt the player is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPrompt {
    pub kind: u16,
    /// Character id of whoever raised the prompt
    pub from_char: i32,
}

/// Gold taken out of the inventory for a purchase whose storage write is
/// still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldGold {
    pub obj_id: u32,
    pub amount: i32,
}

/// One side of an open trade window.
#[derive(Debug, Clone)]
pub struct TradeState {
    pub partner_session: u64,
    pub partner_char: i32,
    /// Copies of everything moved out of the inventory into the window
    pub staged: Vec<InvItem>,
    pub gold: i32,
    /// Object id the staged gold goes back under if the trade is undone
    pub gold_obj: u32,
    pub accepted: bool,
    pub committing: bool,
    /// Held for the whole commit; disconnect cleanup waits on it
    pub guard: Arc<tokio::sync::Mutex<()>>,
}

impl TradeState {
    pub fn new(partner_session: u64, partner_char: i32, guard: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self {
            partner_session,
            partner_char,
            staged: Vec::new(),
            gold: 0,
            gold_obj: 0,
            accepted: false,
            committing: false,
            guard,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.gold == 0
    }
}

/// An open personal warehouse window.
#[derive(Debug, Clone, Default)]
pub struct WarehouseView {
    pub npc_obj: u32,
    /// Transient client id -> stored row
    pub rows: HashMap<u32, WarehouseRow>,
}

/// Wall-clock status countdowns in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTimers {
    pub paralysis: u32,
    pub sleep: u32,
    pub stun: u32,
    pub invis: u32,
    pub pink_name: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegenCounters {
    pub hp_ticks: u32,
    pub mp_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleportTarget {
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub heading: u8,
}

pub struct Player {
    pub session: Arc<Session>,
    pub session_id: u64,
    pub char_id: i32,
    pub account: String,
    pub name: String,

    pub class_type: i32,
    pub class_gfx: i32,
    pub sex: i32,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub heading: u8,

    pub level: i32,
    pub exp: i32,
    pub lawful: i32,
    pub title: String,
    pub pk_count: i32,
    pub karma: i32,
    pub bonus_stats: i32,
    pub elixir_stats: i32,
    pub birthday: i32,

    /// Live stats including equipment and buffs
    pub stats: StatDelta,
    /// Equipment contribution currently folded into `stats`
    pub equip_bonus: StatDelta,
    pub hp: i32,
    pub mp: i32,
    pub food: i32,
    pub dead: bool,
    pub current_weapon: u8,

    pub clan_id: i32,
    pub clan_name: String,
    pub clan_rank: i32,
    pub party_id: Option<u32>,

    pub inventory: Inventory,
    pub buffs: Vec<ActiveBuff>,
    pub bookmarks: Vec<Bookmark>,
    pub known_spells: Vec<i32>,
    pub cooldowns: HashMap<i32, u64>,

    pub map_time_used: HashMap<i32, i32>,
    /// Timed-map group currently ticking (0 = none)
    pub timed_group: i32,
    pub timed_remaining: i32,
    pub map_timer_day: u32,

    pub known: KnownSet,
    pub trade: Option<TradeState>,
    /// Guard of a finished trade whose inventories are still being stored
    pub settling: Option<Arc<tokio::sync::Mutex<()>>>,
    pub held_gold: Option<HeldGold>,
    pub pending: Option<PendingPrompt>,
    /// Destination held until the client confirms or the player can move
    pub pending_teleport: Option<TeleportTarget>,
    pub warehouse: Option<WarehouseView>,
    pub timers: StatusTimers,
    pub regen: RegenCounters,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("session_id", &self.session_id)
            .field("char_id", &self.char_id)
            .field("name", &self.name)
            .field("map", &self.map)
            .field("x", &self.x)
            .field("y", &self.y)
            .finish_non_exhaustive()
    }
}

impl Player {
    pub fn object_id(&self) -> u32 {
        self.char_id as u32
    }

    pub fn is_paralyzed(&self) -> bool {
        self.timers.paralysis > 0 || self.timers.stun > 0
    }

    pub fn is_asleep(&self) -> bool {
        self.timers.sleep > 0
    }

    /// Movement and actions are refused while this holds.
    pub fn is_immobile(&self) -> bool {
        self.is_paralyzed() || self.is_asleep()
    }

    pub fn is_invisible(&self) -> bool {
        self.timers.invis > 0 || self.buffs.iter().any(|b| b.flags.invisible)
    }

    pub fn has_brave(&self) -> bool {
        self.buffs.iter().any(|b| b.flags.brave)
    }

    pub fn has_haste(&self) -> bool {
        self.buffs.iter().any(|b| b.flags.haste)
    }

    pub fn buff_total(&self) -> StatDelta {
        self.buffs.iter().fold(StatDelta::default(), |acc, b| acc.add(&b.delta))
    }

    /// Stats as they must be persisted: live minus equipment minus buffs.
    pub fn base_stats(&self) -> StatDelta {
        self.stats.sub(&self.equip_bonus).sub(&self.buff_total())
    }

    /// Fold a delta into the live stats and clamp the pools.
    pub fn apply_delta(&mut self, d: &StatDelta) {
        self.stats = self.stats.add(d);
        self.clamp_pools();
    }

    /// Pull the pools back inside their maxima. The maxima themselves are
    /// derived from buffs and equipment and are left alone.
    pub fn clamp_pools(&mut self) {
        self.hp = self.hp.min(self.stats.max_hp).max(0);
        self.mp = self.mp.min(self.stats.max_mp).max(0);
    }

    /// Start a buff, replacing any running copy of the same skill.
    pub fn add_buff(&mut self, buff: ActiveBuff) {
        self.remove_buff(buff.skill_id);
        self.apply_delta(&buff.delta);
        self.buffs.push(buff);
    }

    /// Stop a buff and revert exactly its delta.
    pub fn remove_buff(&mut self, skill_id: i32) -> Option<ActiveBuff> {
        let idx = self.buffs.iter().position(|b| b.skill_id == skill_id)?;
        let buff = self.buffs.remove(idx);
        self.apply_delta(&buff.delta.neg());
        Some(buff)
    }

    pub fn clear_buffs(&mut self) -> Vec<ActiveBuff> {
        let ids: Vec<i32> = self.buffs.iter().map(|b| b.skill_id).collect();
        ids.into_iter().filter_map(|id| self.remove_buff(id)).collect()
    }

    /// Replace the equipment contribution with `bonus`.
    pub fn set_equip_bonus(&mut self, bonus: StatDelta) {
        let diff = bonus.sub(&self.equip_bonus);
        self.equip_bonus = bonus;
        self.apply_delta(&diff);
    }

    pub fn hp_ratio(&self) -> u8 {
        if self.stats.max_hp <= 0 {
            return 0;
        }
        ((self.hp.max(0) as i64 * 100) / self.stats.max_hp as i64) as u8
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A player standing at (32768, 32768) on map 4 with 16 in every stat.
    pub fn player(session_id: u64, char_id: i32, name: &str) -> (Player, tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>) {
        let (session, rx) = Session::new(session_id, "127.0.0.1:1".parse().unwrap(), 1 << 20);
        let stats = StatDelta {
            str_: 16,
            dex: 16,
            con: 16,
            wis: 16,
            cha: 16,
            intel: 16,
            max_hp: 100,
            max_mp: 50,
            ac: 10,
            ..Default::default()
        };
        let p = Player {
            session,
            session_id,
            char_id,
            account: format!("{}_acct", name.to_lowercase()),
            name: name.to_string(),
            class_type: 0,
            class_gfx: 0,
            sex: 0,
            x: 32768,
            y: 32768,
            map: 4,
            heading: 0,
            level: 10,
            exp: 0,
            lawful: 0,
            title: String::new(),
            pk_count: 0,
            karma: 0,
            bonus_stats: 0,
            elixir_stats: 0,
            birthday: 20240101,
            stats,
            equip_bonus: StatDelta::default(),
            hp: 100,
            mp: 50,
            food: 40,
            dead: false,
            current_weapon: 0,
            clan_id: 0,
            clan_name: String::new(),
            clan_rank: 0,
            party_id: None,
            inventory: Inventory::new(),
            buffs: Vec::new(),
            bookmarks: Vec::new(),
            known_spells: Vec::new(),
            cooldowns: HashMap::new(),
            map_time_used: HashMap::new(),
            timed_group: 0,
            timed_remaining: 0,
            map_timer_day: 0,
            known: KnownSet::new(),
            trade: None,
            settling: None,
            held_gold: None,
            pending: None,
            pending_teleport: None,
            warehouse: None,
            timers: StatusTimers::default(),
            regen: RegenCounters::default(),
        };
        (p, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::player;
    use super::*;

    #[test]
    fn test_base_stats_strip_equipment_and_buffs() {
        let (mut p, _rx) = player(1, 1, "Alice");
        p.set_equip_bonus(StatDelta { str_: 2, max_hp: 10, ..Default::default() });
        p.add_buff(ActiveBuff {
            skill_id: 42,
            remaining_ticks: 100,
            delta: StatDelta { str_: 3, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        assert_eq!(p.stats.str_, 21);
        assert_eq!(p.stats.max_hp, 110);
        let base = p.base_stats();
        assert_eq!(base.str_, 16);
        assert_eq!(base.max_hp, 100);
    }

    #[test]
    fn test_buff_replace_does_not_stack() {
        let (mut p, _rx) = player(1, 1, "Alice");
        let buff = ActiveBuff {
            skill_id: 7,
            remaining_ticks: 10,
            delta: StatDelta { dex: 2, ..Default::default() },
            flags: BuffFlags { haste: true, ..Default::default() },
            icon: 0,
        };
        p.add_buff(buff.clone());
        p.add_buff(buff);
        assert_eq!(p.stats.dex, 18);
        assert!(p.has_haste());
        p.clear_buffs();
        assert_eq!(p.stats.dex, 16);
        assert!(!p.has_haste());
    }

    #[test]
    fn test_removing_max_hp_buff_clamps_hp() {
        let (mut p, _rx) = player(1, 1, "Alice");
        p.add_buff(ActiveBuff {
            skill_id: 1,
            remaining_ticks: 1,
            delta: StatDelta { max_hp: 50, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        p.hp = 150;
        p.remove_buff(1);
        assert_eq!(p.hp, 100);
    }

    #[test]
    fn test_deep_debuff_reverts_exactly() {
        let (mut p, _rx) = player(1, 1, "Alice");
        let before = p.stats;
        p.add_buff(ActiveBuff {
            skill_id: 9,
            remaining_ticks: 1,
            delta: StatDelta { max_hp: -150, max_mp: -500, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        assert_eq!(p.stats.max_hp, before.max_hp - 150);
        assert_eq!((p.hp, p.mp), (0, 0));
        p.remove_buff(9);
        assert_eq!(p.stats, before);
    }

    #[test]
    fn test_immobile() {
        let (mut p, _rx) = player(1, 1, "Alice");
        assert!(!p.is_immobile());
        p.timers.paralysis = 5;
        assert!(p.is_immobile());
        p.timers.paralysis = 0;
        p.timers.sleep = 1;
        assert!(p.is_immobile());
    }
}
