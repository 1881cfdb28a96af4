//! Converting between live players and storage rows.
//!
//! A snapshot is taken under the world lock and saved after it is
//! released. Each store runs on its own deadline; one failing store does
//! not stop the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::*;
use crate::core::{secs_to_ticks, TICKS_PER_SECOND};
use crate::database::Content;
use crate::game::item::gold_item;
use crate::game::types::Bless;
use crate::world::inventory::{InvItem, Inventory};
use crate::world::known::KnownSet;
use crate::world::player::{ActiveBuff, Player, RegenCounters, StatusTimers};
use crate::session::Session;

/// `map_times` key holding the day-of-year the usage belongs to.
pub const MAP_TIME_DAY_KEY: i32 = 0;

/// Durable state of one player, detached from the world.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub character: CharacterRow,
    /// None while a trade commit is in flight; the commit stores it
    pub inventory: Option<InventorySave>,
    pub bookmarks: Vec<Bookmark>,
    pub spells: Vec<i32>,
    pub buffs: Vec<BuffRow>,
    pub map_times: HashMap<i32, i32>,
}

static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sequence for the next inventory save. Strictly increasing, and seeded
/// from the clock so a restarted server still outranks older saves.
pub fn next_save_seq() -> u64 {
    let floor = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let prev = SAVE_SEQ
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some(s.max(floor) + 1))
        .unwrap_or_else(|s| s);
    prev.max(floor) + 1
}

/// Rows for an inventory as it stands now.
pub fn inventory_save(char_id: i32, inventory: &Inventory, seq: u64) -> InventorySave {
    InventorySave {
        char_id,
        seq,
        items: inventory.items().iter().map(|i| item_row(char_id, i)).collect(),
    }
}

fn item_row(char_id: i32, it: &InvItem) -> ItemRow {
    ItemRow {
        obj_id: it.obj_id,
        char_id,
        item_id: it.item_id,
        count: it.count,
        enchant: it.enchant,
        bless: it.bless.wire(),
        identified: it.identified,
        equipped: it.equipped,
    }
}

impl PlayerSnapshot {
    pub fn capture(p: &Player) -> Self {
        let base = p.base_stats();
        let character = CharacterRow {
            id: p.char_id,
            account: p.account.clone(),
            name: p.name.clone(),
            class_type: p.class_type,
            class_gfx: p.class_gfx,
            sex: p.sex,
            level: p.level,
            exp: p.exp,
            hp: p.hp,
            mp: p.mp,
            base,
            lawful: p.lawful,
            x: p.x,
            y: p.y,
            map: p.map,
            heading: p.heading as i32,
            food: p.food,
            title: p.title.clone(),
            clan_id: p.clan_id,
            clan_name: p.clan_name.clone(),
            clan_rank: p.clan_rank,
            pk_count: p.pk_count,
            karma: p.karma,
            bonus_stats: p.bonus_stats,
            elixir_stats: p.elixir_stats,
            birthday: p.birthday,
            delete_at: None,
        };

        let committing = p.trade.as_ref().is_some_and(|t| t.committing);
        let inventory = if committing || p.settling.is_some() {
            None
        } else {
            // Staged trade goods and held gold still belong to the player
            // until their commit lands.
            let mut inv = p.inventory.clone();
            if let Some(t) = p.trade.as_ref() {
                for it in &t.staged {
                    inv.add(it.clone());
                }
                if t.gold > 0 {
                    inv.add(gold_item(t.gold_obj, t.gold));
                }
            }
            if let Some(h) = p.held_gold {
                inv.add(gold_item(h.obj_id, h.amount));
            }
            Some(inventory_save(p.char_id, &inv, next_save_seq()))
        };

        let buffs = p
            .buffs
            .iter()
            .map(|b| BuffRow {
                skill_id: b.skill_id,
                remaining_secs: b.remaining_ticks.div_ceil(TICKS_PER_SECOND as u32) as i32,
                delta: b.delta,
                flags: b.flags,
                icon: b.icon,
            })
            .collect();

        let mut map_times = p.map_time_used.clone();
        map_times.insert(MAP_TIME_DAY_KEY, p.map_timer_day as i32);

        let mut spells = p.known_spells.clone();
        spells.sort_unstable();
        spells.dedup();

        Self {
            character,
            inventory,
            bookmarks: p.bookmarks.clone(),
            spells,
            buffs,
            map_times,
        }
    }
}

/// Save every store of a snapshot. Returns how many stores failed.
pub async fn save_snapshot(storage: &dyn Storage, snap: &PlayerSnapshot) -> usize {
    let id = snap.character.id;
    let inventory = async {
        match &snap.inventory {
            Some(inv) => with_deadline(SAVE_DEADLINE, storage.save_inventory(inv)).await.map(|_| ()),
            None => Ok(()),
        }
    };
    let (c, i, b, s, f, m) = tokio::join!(
        with_deadline(SAVE_DEADLINE, storage.save_character(&snap.character)),
        inventory,
        with_deadline(SAVE_DEADLINE, storage.save_bookmarks(id, &snap.bookmarks)),
        with_deadline(SAVE_DEADLINE, storage.save_known_spells(id, &snap.spells)),
        with_deadline(SAVE_DEADLINE, storage.save_buffs(id, &snap.buffs)),
        with_deadline(SAVE_DEADLINE, storage.save_map_times(id, &snap.map_times)),
    );
    let mut failed = 0;
    for (store, r) in [("character", c), ("inventory", i), ("bookmarks", b), ("spells", s), ("buffs", f), ("map_times", m)] {
        if let Err(e) = r {
            tracing::error!("[persist] [save_failed] char_id={} store={} err={}", id, store, e);
            failed += 1;
        }
    }
    if failed == 0 {
        tracing::debug!("[persist] [saved] char_id={} name={}", id, snap.character.name);
    }
    failed
}

/// Everything stored for one character.
#[derive(Debug, Clone)]
pub struct LoadedCharacter {
    pub character: CharacterRow,
    pub items: Vec<ItemRow>,
    pub bookmarks: Vec<Bookmark>,
    pub spells: Vec<i32>,
    pub buffs: Vec<BuffRow>,
    pub map_times: HashMap<i32, i32>,
}

pub async fn load_character_state(storage: &dyn Storage, character: CharacterRow) -> Result<LoadedCharacter, StorageError> {
    let id = character.id;
    let items = with_deadline(DB_DEADLINE, storage.load_inventory(id)).await?;
    let bookmarks = with_deadline(DB_DEADLINE, storage.load_bookmarks(id)).await?;
    let spells = with_deadline(DB_DEADLINE, storage.load_known_spells(id)).await?;
    let buffs = with_deadline(DB_DEADLINE, storage.load_buffs(id)).await?;
    let map_times = with_deadline(DB_DEADLINE, storage.load_map_times(id)).await?;
    Ok(LoadedCharacter { character, items, bookmarks, spells, buffs, map_times })
}

/// Rebuild a live player: base stats, then equipment, then buff replay.
pub fn build_player(session: Arc<Session>, loaded: LoadedCharacter, content: &Content) -> Player {
    let LoadedCharacter { character: c, items, bookmarks, spells, buffs, mut map_times } = loaded;

    let mut inventory = Inventory::new();
    for r in items {
        let stackable = content.items.get(r.item_id).map(|t| t.is_stackable()).unwrap_or(false);
        inventory.add(InvItem {
            obj_id: r.obj_id,
            item_id: r.item_id,
            count: r.count,
            enchant: r.enchant,
            bless: Bless::from_wire(r.bless),
            identified: r.identified,
            equipped: r.equipped,
            stackable,
        });
    }
    let current_weapon = inventory
        .equipped()
        .filter_map(|i| content.items.get(i.item_id))
        .find(|t| t.slot == Some(crate::database::item_db::EquipSlot::Weapon))
        .map(|t| t.weapon_visual)
        .unwrap_or(0);

    let day = map_times.remove(&MAP_TIME_DAY_KEY).unwrap_or(0).max(0) as u32;

    let mut p = Player {
        session_id: session.id,
        session,
        char_id: c.id,
        account: c.account,
        name: c.name,
        class_type: c.class_type,
        class_gfx: c.class_gfx,
        sex: c.sex,
        x: c.x,
        y: c.y,
        map: c.map,
        heading: (c.heading & 7) as u8,
        level: c.level,
        exp: c.exp,
        lawful: c.lawful,
        title: c.title,
        pk_count: c.pk_count,
        karma: c.karma,
        bonus_stats: c.bonus_stats,
        elixir_stats: c.elixir_stats,
        birthday: c.birthday,
        stats: c.base,
        equip_bonus: Default::default(),
        hp: c.hp,
        mp: c.mp,
        food: c.food,
        dead: c.hp <= 0,
        current_weapon,
        clan_id: c.clan_id,
        clan_name: c.clan_name,
        clan_rank: c.clan_rank,
        party_id: None,
        inventory,
        buffs: Vec::new(),
        bookmarks,
        known_spells: spells,
        cooldowns: HashMap::new(),
        map_time_used: map_times,
        timed_group: 0,
        timed_remaining: 0,
        map_timer_day: day,
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

    // Pools are saved against live maxima, so restore them after the bonuses land.
    let (hp, mp) = (p.hp, p.mp);
    let bonus = p.inventory.equip_bonus(&content.items);
    p.set_equip_bonus(bonus);
    for b in buffs {
        p.add_buff(ActiveBuff {
            skill_id: b.skill_id,
            remaining_ticks: secs_to_ticks(b.remaining_secs.max(1) as u64) as u32,
            delta: b.delta,
            flags: b.flags,
            icon: b.icon,
        });
    }
    p.hp = hp;
    p.mp = mp;
    p.clamp_pools();
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::StatDelta;
    use crate::persist::memory::MemoryStorage;
    use crate::world::player::test_support::player;
    use crate::world::player::{BuffFlags, TradeState};

    const ITEMS: &str = r#"
items:
  - id: 40308
    name: adena
    stackable: true
    weight: 0
  - id: 20
    name: sword
    slot: weapon
    weapon_visual: 4
    bonus: { str: 2, max_hp: 10 }
"#;

    fn content() -> Content {
        Content::from_yaml(ITEMS, "", "", "").unwrap()
    }

    fn sword(obj: u32) -> InvItem {
        InvItem {
            obj_id: obj,
            item_id: 20,
            count: 1,
            enchant: 0,
            bless: Bless::Normal,
            identified: true,
            equipped: true,
            stackable: false,
        }
    }

    #[test]
    fn test_capture_saves_base_stats() {
        let content = content();
        let (mut p, _rx) = player(1, 7, "Alice");
        p.inventory.add(sword(500));
        let bonus = p.inventory.equip_bonus(&content.items);
        p.set_equip_bonus(bonus);
        p.add_buff(ActiveBuff {
            skill_id: 42,
            remaining_ticks: 100,
            delta: StatDelta { str_: 3, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        assert_eq!(p.stats.str_, 21);
        let snap = PlayerSnapshot::capture(&p);
        assert_eq!(snap.character.base.str_, 16);
        assert_eq!(snap.character.base.max_hp, 100);
        assert_eq!(snap.buffs[0].remaining_secs, 20);
        assert_eq!(snap.inventory.map(|i| i.items.len()), Some(1));
    }

    #[test]
    fn test_capture_includes_staged_trade_items() {
        let (mut p, _rx) = player(1, 7, "Alice");
        let mut t = TradeState::new(2, 8, Default::default());
        t.staged.push(sword(501));
        p.trade = Some(t);
        let inv = PlayerSnapshot::capture(&p).inventory.unwrap();
        assert_eq!(inv.items.len(), 1);
        assert_eq!(inv.items[0].obj_id, 501);
    }

    #[test]
    fn test_capture_folds_staged_gold_back() {
        let (mut p, _rx) = player(1, 7, "Alice");
        p.inventory.add(gold_item(600, 400));
        let mut t = TradeState::new(2, 8, Default::default());
        t.gold = 100;
        t.gold_obj = 600;
        p.trade = Some(t);
        let inv = PlayerSnapshot::capture(&p).inventory.unwrap();
        let gold: i32 = inv.items.iter().filter(|i| i.item_id == 40308).map(|i| i.count).sum();
        assert_eq!(gold, 500);
        assert_eq!(inv.items.len(), 1);

        // All of it staged: the stack comes back under its old id.
        p.inventory = Inventory::new();
        if let Some(t) = p.trade.as_mut() {
            t.gold = 500;
        }
        let inv = PlayerSnapshot::capture(&p).inventory.unwrap();
        assert_eq!((inv.items[0].obj_id, inv.items[0].count), (600, 500));
    }

    #[test]
    fn test_commit_in_flight_leaves_inventory_out() {
        let (mut p, _rx) = player(1, 7, "Alice");
        let mut t = TradeState::new(2, 8, Default::default());
        t.staged.push(sword(501));
        t.committing = true;
        p.trade = Some(t);
        let snap = PlayerSnapshot::capture(&p);
        assert!(snap.inventory.is_none());
        assert_eq!(snap.character.id, 7);

        p.trade = None;
        p.settling = Some(Default::default());
        assert!(PlayerSnapshot::capture(&p).inventory.is_none());
        p.settling = None;
        assert!(PlayerSnapshot::capture(&p).inventory.is_some());
    }

    #[test]
    fn test_save_seq_increases() {
        let a = next_save_seq();
        let b = next_save_seq();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_save_and_rebuild_reproduces_live_stats() {
        let content = content();
        let storage = MemoryStorage::new();
        let (mut p, _rx) = player(1, 0, "Alice");
        let id = storage.seed_character(CharacterRow { name: "Alice".into(), account: "alice".into(), ..Default::default() });
        p.char_id = id;
        p.inventory.add(sword(500));
        let bonus = p.inventory.equip_bonus(&content.items);
        p.set_equip_bonus(bonus);
        p.add_buff(ActiveBuff {
            skill_id: 42,
            remaining_ticks: 300,
            delta: StatDelta { str_: 3, max_hp: 5, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        p.hp = p.stats.max_hp;
        let live = p.stats;

        let snap = PlayerSnapshot::capture(&p);
        assert_eq!(save_snapshot(&storage, &snap).await, 0);
        assert_eq!(save_snapshot(&storage, &snap).await, 0);

        let row = storage.character_by_name("alice").unwrap();
        assert_eq!(row.base.str_, 16);
        let loaded = load_character_state(&storage, row).await.unwrap();
        let (session, _rx2) = Session::new(9, "127.0.0.1:1".parse().unwrap(), 1024);
        let back = build_player(session, loaded, &content);
        assert_eq!(back.stats, live);
        assert_eq!(back.stats.str_, 21);
        assert_eq!(back.stats.max_hp, 115);
        assert_eq!(back.hp, 115);
        assert_eq!(back.current_weapon, 4);
    }
}
