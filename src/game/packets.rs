//! Server packet builders.
//!
//! Every builder returns a finished payload ready for [`Session::send`].
//! Layouts follow the 3.80C client byte for byte; field comments name the
//! wire type only where the meaning is not obvious.
//!
//! [`Session::send`]: crate::session::Session::send

use bytes::Bytes;

use crate::database::item_db::{EquipSlot, ItemTemplate};
use crate::database::map_db::TimedMapGroup;
use crate::database::Content;
use crate::network::opcodes::*;
use crate::network::packet::Writer;
use crate::persist::CharacterRow;
use crate::world::clan::{Clan, ANNOUNCEMENT_LEN, NOTES_LEN};
use crate::world::entities::{Companion, Door, GroundItem, Npc};
use crate::world::inventory::{max_weight, InvItem};
use crate::world::player::{Bookmark, Player};

/// Display name of an inventory entry: enchant prefix, equip suffix, count.
pub fn item_view_name(item: &InvItem, t: Option<&ItemTemplate>) -> String {
    let base = t.map(|t| t.name.as_str()).unwrap_or("?");
    let mut name = match item.enchant {
        e if e > 0 => format!("+{} {}", e, base),
        e if e < 0 => format!("{} {}", e, base),
        _ => base.to_string(),
    };
    if item.equipped {
        match t.and_then(|t| t.slot) {
            Some(EquipSlot::Weapon) => name.push_str(" ($9)"),
            Some(_) => name.push_str(" ($117)"),
            None => {}
        }
    }
    if item.count > 1 {
        name.push_str(&format!(" ({})", item.count));
    }
    name
}

/// Current weight on the 0..=242 status bar.
pub fn weight242(p: &Player, content: &Content) -> u8 {
    p.inventory.weight242(&content.items, max_weight(p.stats.str_, p.stats.con))
}

// ============================================
// Account and character select
// ============================================

pub fn build_server_version(server_id: u8, language: u8, start_time: i32, uptime: i32) -> Bytes {
    let mut w = Writer::new(S_SERVER_VERSION);
    w.c(0)
        .c(server_id)
        .du(0x07cb_f4dd)
        .du(0x07cb_f4dd)
        .du(0x77fc_692d)
        .du(0x07cb_f4d9)
        .d(start_time)
        .c(0)
        .c(0)
        .c(language)
        .du(0x087f_7dc2)
        .d(uptime)
        .h(1);
    w.finish()
}

pub fn build_login_check(reason: u16) -> Bytes {
    let mut w = Writer::new(S_LOGIN_CHECK);
    w.h(reason).d(0).d(0).d(0);
    w.finish()
}

pub fn build_num_character(count: u8, max_slots: u8) -> Bytes {
    let mut w = Writer::new(S_NUM_CHARACTER);
    w.c(count).c(max_slots);
    w.finish()
}

fn character_summary(op: u8, c: &CharacterRow) -> Bytes {
    let stat = |v: i32| v.clamp(0, 255) as u8;
    let level = stat(c.level);
    let (s, d, co, wi, ch, it) =
        (stat(c.base.str_), stat(c.base.dex), stat(c.base.con), stat(c.base.wis), stat(c.base.cha), stat(c.base.intel));
    let mut w = Writer::new(op);
    w.s(&c.name)
        .s(&c.clan_name)
        .c(c.class_type as u8)
        .c(c.sex as u8)
        .h(c.lawful as i16 as u16)
        .h(c.base.max_hp as u16)
        .h(c.base.max_mp as u16)
        .c(c.base.ac as i8 as u8)
        .c(level)
        .c(s)
        .c(d)
        .c(co)
        .c(wi)
        .c(ch)
        .c(it)
        .c(0)
        .d(c.birthday)
        .c(level ^ s ^ d ^ co ^ wi ^ ch ^ it);
    w.finish()
}

pub fn build_character_info(c: &CharacterRow) -> Bytes {
    character_summary(S_CHARACTER_INFO, c)
}

pub fn build_new_char_info(c: &CharacterRow) -> Bytes {
    character_summary(S_NEW_CHAR_INFO, c)
}

pub fn build_create_char_check(reason: u8) -> Bytes {
    let mut w = Writer::new(S_CREATE_CHARACTER_CHECK);
    w.c(reason).d(0).h(0);
    w.finish()
}

pub fn build_delete_char_check(result: u8) -> Bytes {
    let mut w = Writer::new(S_DELETE_CHARACTER_CHECK);
    w.c(result);
    w.finish()
}

// ============================================
// Enter world
// ============================================

pub fn build_enter_world_check(clan_char: Option<i32>) -> Bytes {
    let mut w = Writer::new(S_ENTER_WORLD_CHECK);
    w.c(3);
    match clan_char {
        Some(id) => w.d(id),
        None => w.c(0x53).c(1).c(0).c(0x8b),
    };
    w.c(0x9c).c(0x1f);
    w.finish()
}

fn write_item(w: &mut Writer, item: &InvItem, content: &Content) {
    let t = content.items.get(item.item_id);
    w.d(item.obj_id as i32)
        .h(t.map(|t| t.id as u16).unwrap_or(0))
        .c(t.map(|t| t.use_type).unwrap_or(0))
        .c(0)
        .h(t.map(|t| t.inv_gfx).unwrap_or(0))
        .c(item.bless.wire())
        .d(item.count)
        .c(item.identified as u8)
        .s(&item_view_name(item, t))
        .c(0)
        .c(0x17)
        .c(0)
        .h(0)
        .h(0)
        .c(item.enchant as i8 as u8)
        .d(item.obj_id as i32)
        .d(0)
        .d(0)
        .d(7)
        .c(0);
}

pub fn build_inventory_list(items: &[InvItem], content: &Content) -> Bytes {
    let mut w = Writer::new(S_ADD_INVENTORY_BATCH);
    w.c(items.len().min(255) as u8);
    for item in items.iter().take(255) {
        write_item(&mut w, item, content);
    }
    w.finish()
}

pub fn build_add_item(item: &InvItem, content: &Content) -> Bytes {
    let mut w = Writer::new(S_ADD_ITEM);
    write_item(&mut w, item, content);
    w.finish()
}

pub fn build_remove_inventory(obj_id: u32) -> Bytes {
    let mut w = Writer::new(S_REMOVE_INVENTORY);
    w.d(obj_id as i32);
    w.finish()
}

/// Count or name change of an existing entry.
pub fn build_item_count(item: &InvItem, content: &Content) -> Bytes {
    let t = content.items.get(item.item_id);
    let mut w = Writer::new(S_CHANGE_ITEM_USE);
    w.d(item.obj_id as i32).s(&item_view_name(item, t)).d(item.count).c(0);
    w.finish()
}

pub fn build_status(p: &Player, content: &Content, unix_now: i64) -> Bytes {
    let st = &p.stats;
    let stat = |v: i32| v.clamp(0, 255) as u8;
    let mut w = Writer::new(S_STATUS);
    w.d(p.object_id() as i32)
        .c(p.level.clamp(1, 127) as u8)
        .d(p.exp)
        .c(stat(st.str_))
        .c(stat(st.intel))
        .c(stat(st.wis))
        .c(stat(st.dex))
        .c(stat(st.con))
        .c(stat(st.cha))
        .h(p.hp.max(0) as u16)
        .h(st.max_hp.max(0) as u16)
        .h(p.mp.max(0) as u16)
        .h(st.max_mp.max(0) as u16)
        .c(st.ac as i8 as u8)
        .d((unix_now - unix_now % 300) as i32)
        .c(p.food.clamp(0, 255) as u8)
        .c(weight242(p, content))
        .h(p.lawful as i16 as u16)
        .h(0)
        .h(0)
        .h(0)
        .h(0)
        .d(0);
    w.finish()
}

pub fn build_map_id(map: i32, underwater: bool) -> Bytes {
    let mut w = Writer::new(S_WORLD);
    w.h(map as u16).c(underwater as u8).d(0).d(0).d(0);
    w.finish()
}

fn char_status_byte(p: &Player) -> u8 {
    0x04 | if p.has_brave() { 0x10 } else { 0 }
}

pub fn build_own_char_pack(p: &Player) -> Bytes {
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(p.x as u16)
        .h(p.y as u16)
        .d(p.object_id() as i32)
        .h(p.class_gfx as u16)
        .c(if p.dead { 8 } else { p.current_weapon })
        .c(p.heading)
        .c(0)
        .c(p.has_haste() as u8)
        .d(1)
        .h(p.lawful as i16 as u16)
        .s(&p.name)
        .s(&p.title)
        .c(char_status_byte(p))
        .d(0)
        .s(&p.clan_name)
        .s("")
        .c(if p.clan_id != 0 { (p.clan_rank << 4) as u8 } else { 0xb0 })
        .c(0xff)
        .c(0)
        .c(0)
        .c(0)
        .c(0xff)
        .c(0xff)
        .s("")
        .c(0);
    w.finish()
}

/// `party_hp` is the HP ratio shown to party members, 0xFF otherwise.
pub fn build_other_char_pack(p: &Player, party_hp: u8) -> Bytes {
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(p.x as u16)
        .h(p.y as u16)
        .d(p.object_id() as i32)
        .h(p.class_gfx as u16)
        .c(if p.dead { 8 } else { p.current_weapon })
        .c(p.heading)
        .c(0)
        .c(p.has_haste() as u8)
        .d(1)
        .h(p.lawful as i16 as u16)
        .s(&p.name)
        .s(&p.title)
        .c(char_status_byte(p))
        .d(0)
        .s(&p.clan_name)
        .s("")
        .c(0)
        .c(party_hp)
        .c(0)
        .c(0)
        .s("")
        .c(0xff)
        .c(0xff);
    w.finish()
}

pub fn build_npc_pack(n: &Npc) -> Bytes {
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(n.x as u16)
        .h(n.y as u16)
        .d(n.obj_id as i32)
        .h(n.gfx)
        .c(if n.dead { 8 } else { 0 })
        .c(n.heading)
        .c(0)
        .c(0)
        .d(n.exp)
        .h(0)
        .s(&n.nameid)
        .s("")
        .c(0)
        .d(0)
        .s("")
        .s("")
        .c(0)
        .c(0xff)
        .c(0)
        .c(n.level.clamp(0, 255) as u8)
        .c(0xff)
        .c(0xff)
        .c(0);
    w.finish()
}

pub fn build_ground_pack(g: &GroundItem, content: &Content) -> Bytes {
    let t = content.items.get(g.item.item_id);
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(g.x as u16)
        .h(g.y as u16)
        .d(g.obj_id() as i32)
        .h(t.map(|t| t.grd_gfx).unwrap_or(0))
        .c(0)
        .c(0)
        .c(0)
        .c(0)
        .d(g.item.count)
        .h(0)
        .s(&item_view_name(&g.item, t))
        .s("")
        .c(0)
        .d(0)
        .s("")
        .s("")
        .c(0)
        .c(0xff)
        .c(0)
        .c(0)
        .c(0xff)
        .c(0xff)
        .c(0);
    w.finish()
}

pub fn build_door_pack(d: &Door) -> Bytes {
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(d.x as u16)
        .h(d.y as u16)
        .d(d.obj_id as i32)
        .h(d.gfx)
        .c(d.status())
        .c(0)
        .c(0)
        .c(0)
        .d(0)
        .h(0)
        .s("")
        .s("")
        .c(0)
        .d(0)
        .s("")
        .s("")
        .c(0)
        .c(0xff)
        .c(0)
        .c(0)
        .c(0xff)
        .c(0xff)
        .c(0);
    w.finish()
}

/// Owners see the real HP ratio; everyone else 0xFF.
pub fn build_companion_pack(c: &Companion, viewer_is_owner: bool, master_name: &str) -> Bytes {
    let hp = if viewer_is_owner && c.max_hp > 0 { (c.hp.max(0) * 100 / c.max_hp).min(100) as u8 } else { 0xff };
    let mut w = Writer::new(S_PUT_OBJECT);
    w.h(c.x as u16)
        .h(c.y as u16)
        .d(c.obj_id as i32)
        .h(c.gfx)
        .c(if c.hp <= 0 { 8 } else { 0 })
        .c(c.heading)
        .c(0)
        .c(0)
        .d(0)
        .h(0)
        .s(&c.name)
        .s("")
        .c(0)
        .d(0)
        .s("")
        .s(master_name)
        .c(0)
        .c(hp)
        .c(0)
        .c(0)
        .c(0)
        .c(0xff)
        .c(0xff);
    w.finish()
}

pub fn build_magic_status(sp: i32, mr: i32) -> Bytes {
    let mut w = Writer::new(S_MAGIC_STATUS);
    w.c(sp.clamp(0, 255) as u8).h(mr.max(0) as u16);
    w.finish()
}

pub fn build_weather(weather: u8) -> Bytes {
    let mut w = Writer::new(S_WEATHER);
    w.c(weather);
    w.finish()
}

pub fn build_time(seconds: i32) -> Bytes {
    let mut w = Writer::new(S_TIME);
    w.d(seconds);
    w.finish()
}

pub fn build_skill_list(bitmap: &[u8; 32]) -> Bytes {
    let mut w = Writer::new(S_SKILL_LIST);
    w.c(32).bytes(bitmap).c(0);
    w.finish()
}

pub fn build_bookmarks(marks: &[Bookmark]) -> Bytes {
    let count = marks.len().min(127);
    let mut w = Writer::new(S_BOOKMARKS);
    w.c(0x2a).c(0x80).c(0).c(2);
    for i in 0..127 {
        w.c(if i < count { i as u8 } else { 0 });
    }
    w.c(0x3c).c(0).c(count as u8).c(0);
    for b in &marks[..count] {
        w.h(b.x as u16).h(b.y as u16).s(&b.name).h(b.map as u16).d(b.id);
    }
    w.finish()
}

pub fn build_add_bookmark(b: &Bookmark) -> Bytes {
    let mut w = Writer::new(S_ADD_BOOKMARK);
    w.s(&b.name).h(b.map as u16).d(b.id).h(b.x as u16).h(b.y as u16);
    w.finish()
}

/// Echo of the stored character config. `None` when nothing usable is stored.
pub fn build_char_config(blob: &[u8]) -> Option<Bytes> {
    if blob.len() < 5 {
        return None;
    }
    let stored = i32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    if stored <= 0 {
        return None;
    }
    let mut w = Writer::new(S_EVENT);
    w.c(EV_CHARACTER_CONFIG).d(stored).bytes(&blob[4..]);
    Some(w.finish())
}

/// Sent on change-character; the client answers by asking for its list.
pub fn build_logout() -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_LOGOUT);
    w.finish()
}

pub fn build_clan_name(obj_id: u32, clan_name: &str, clan_id: i32, joining: bool) -> Bytes {
    let mut w = Writer::new(S_CLAN_NAME);
    w.d(obj_id as i32).s(clan_name).d(0).c(0);
    if joining {
        w.c(0x0a).d(0);
    } else {
        w.c(0x0b).d(clan_id);
    }
    w.finish()
}

pub fn build_char_title(obj_id: u32, title: &str) -> Bytes {
    let mut w = Writer::new(S_CHAR_TITLE);
    w.d(obj_id as i32).s(title);
    w.finish()
}

pub fn build_clan_attention() -> Bytes {
    let mut w = Writer::new(S_CLAN_ATTENTION);
    w.d(2);
    w.finish()
}

pub fn build_pledge_announce(clan: &Clan) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_PLEDGE_ANNOUNCE)
        .s(&clan.name)
        .s(&clan.leader_name)
        .d(clan.emblem_id)
        .d(clan.found_date)
        .fixed(&clan.announcement, ANNOUNCEMENT_LEN);
    w.finish()
}

/// One row of the pledge member window.
pub struct PledgeRow<'a> {
    pub name: &'a str,
    pub rank: i32,
    /// 0 when offline
    pub level: i32,
    pub notes: &'a [u8],
    pub char_id: i32,
    /// 0 when offline
    pub class_type: i32,
}

pub fn build_pledge_members(sub: u8, rows: &[PledgeRow<'_>]) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(sub).h(1).c(rows.len().min(255) as u8);
    for r in rows.iter().take(255) {
        w.s(r.name)
            .c(r.rank as u8)
            .c(r.level.clamp(0, 255) as u8)
            .fixed(r.notes, NOTES_LEN)
            .d(r.char_id)
            .c(r.class_type as u8);
    }
    w.finish()
}

/// Tells a clan member's client to refetch the emblem.
pub fn build_emblem_reset(obj_id: u32, emblem_id: i32) -> Bytes {
    let mut w = Writer::new(S_BOOKMARKS);
    w.c(0x3c).d(obj_id as i32).d(emblem_id);
    w.finish()
}

pub fn build_emblem(emblem_id: i32, data: &[u8]) -> Bytes {
    let mut w = Writer::new(S_EMBLEM);
    w.d(emblem_id).bytes(data);
    w.finish()
}

pub fn build_map_timer(remaining_secs: i32) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_MAP_TIMER).h(remaining_secs.max(0) as u16);
    w.finish()
}

/// Remaining minutes per timed-map group.
pub fn build_map_time_list(groups: &[TimedMapGroup], used: impl Fn(i32) -> i32) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_DISPLAY_MAP_TIME).d(groups.len() as i32);
    for g in groups {
        let left = (g.max_secs - used(g.id)).max(0);
        w.d(g.id).s(&g.name).d(left / 60);
    }
    w.finish()
}

pub fn build_buff_icon(icon: u8, secs: u16) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(icon).h(secs);
    w.finish()
}

pub fn build_weight(w242: u8) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(10).c(w242);
    w.finish()
}

pub fn build_food(food: i32) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(11).c(food.clamp(0, 255) as u8);
    w.finish()
}

// ============================================
// Objects on screen
// ============================================

pub fn build_remove_object(obj_id: u32) -> Bytes {
    let mut w = Writer::new(S_REMOVE_OBJECT);
    w.d(obj_id as i32);
    w.finish()
}

/// The client animates from the previous tile along `heading`.
pub fn build_move_object(obj_id: u32, prev_x: i32, prev_y: i32, heading: u8) -> Bytes {
    let mut w = Writer::new(S_MOVE_OBJECT);
    w.d(obj_id as i32).h(prev_x as u16).h(prev_y as u16).c(heading).h(0);
    w.finish()
}

pub fn build_change_heading(obj_id: u32, heading: u8) -> Bytes {
    let mut w = Writer::new(S_CHANGE_HEADING);
    w.d(obj_id as i32).c(heading);
    w.finish()
}

// ============================================
// Combat and status
// ============================================

pub fn build_attack_melee(attacker: u32, target: u32, dmg: i32, heading: u8) -> Bytes {
    let mut w = Writer::new(S_ATTACK);
    w.c(1).d(attacker as i32).d(target as i32).h(dmg.max(0) as u16).c(heading).d(0).c(0);
    w.finish()
}

pub struct RangedHit {
    pub attacker: u32,
    pub target: u32,
    pub dmg: i32,
    pub heading: u8,
    pub seq: i32,
    pub from: (i32, i32),
    pub to: (i32, i32),
}

pub fn build_attack_arrow(h: &RangedHit) -> Bytes {
    let mut w = Writer::new(S_ATTACK);
    w.c(1)
        .d(h.attacker as i32)
        .d(h.target as i32)
        .h(h.dmg.max(0) as u16)
        .c(h.heading)
        .d(h.seq)
        .h(66)
        .c(0)
        .h(h.from.0 as u16)
        .h(h.from.1 as u16)
        .h(h.to.0 as u16)
        .h(h.to.1 as u16)
        .c(0)
        .c(0)
        .c(0);
    w.finish()
}

pub fn build_attack_skill(h: &RangedHit, gfx: u16, use_type: u8) -> Bytes {
    let mut w = Writer::new(S_ATTACK);
    w.c(18)
        .d(h.attacker as i32)
        .d(h.target as i32)
        .h(h.dmg.max(0) as u16)
        .c(h.heading)
        .d(h.seq)
        .h(gfx)
        .c(use_type)
        .h(h.from.0 as u16)
        .h(h.from.1 as u16)
        .h(h.to.0 as u16)
        .h(h.to.1 as u16)
        .c(0)
        .c(0)
        .c(0);
    w.finish()
}

/// `ratio` 0..=100, or 0xFF to clear the meter.
pub fn build_hp_meter(obj_id: u32, ratio: u8) -> Bytes {
    let mut w = Writer::new(S_HP_METER);
    w.d(obj_id as i32).h(ratio as u16);
    w.finish()
}

pub fn build_action(obj_id: u32, action: u8) -> Bytes {
    let mut w = Writer::new(S_ACTION);
    w.d(obj_id as i32).c(action);
    w.finish()
}

pub fn build_exp(level: i32, exp: i32) -> Bytes {
    let mut w = Writer::new(S_EXP);
    w.c(level.clamp(1, 127) as u8).d(exp);
    w.finish()
}

pub fn build_hit_point(hp: i32, max_hp: i32) -> Bytes {
    let mut w = Writer::new(S_HIT_POINT);
    w.h(hp.max(0) as u16).h(max_hp.max(0) as u16);
    w.finish()
}

pub fn build_mana_point(mp: i32, max_mp: i32) -> Bytes {
    let mut w = Writer::new(S_MANA_POINT);
    w.h(mp.max(0) as u16).h(max_mp.max(0) as u16);
    w.finish()
}

pub fn build_speed(obj_id: u32, kind: u8, secs: u16) -> Bytes {
    let mut w = Writer::new(S_SPEED);
    w.d(obj_id as i32).c(kind).h(secs);
    w.finish()
}

pub fn build_invis(obj_id: u32, invisible: bool) -> Bytes {
    let mut w = Writer::new(S_INVIS);
    w.d(obj_id as i32).c(invisible as u8);
    w.finish()
}

pub fn build_paralysis(sub: u8) -> Bytes {
    let mut w = Writer::new(S_PARALYSIS);
    w.c(sub);
    w.finish()
}

pub fn build_pink_name(obj_id: u32, secs: i32) -> Bytes {
    let mut w = Writer::new(S_PINK_NAME);
    w.d(obj_id as i32).d(secs);
    w.finish()
}

pub fn build_lawful(obj_id: u32, lawful: i32) -> Bytes {
    let mut w = Writer::new(S_LAWFUL);
    w.d(obj_id as i32).h(lawful as i16 as u16).d(0);
    w.finish()
}

pub fn build_effect(obj_id: u32, gfx: u16) -> Bytes {
    let mut w = Writer::new(S_EFFECT);
    w.d(obj_id as i32).h(gfx);
    w.finish()
}

// ============================================
// Messages and dialogs
// ============================================

/// Keyed client message with optional string arguments.
pub fn build_message_code(msg: u16, args: &[&str]) -> Bytes {
    let mut w = Writer::new(S_MESSAGE_CODE);
    w.h(msg).c(args.len() as u8);
    for a in args {
        w.s(a);
    }
    w.finish()
}

pub fn build_yes_no(counter: i32, kind: u16, args: &[&str]) -> Bytes {
    let mut w = Writer::new(S_YES_NO);
    w.h(0).d(counter).h(kind);
    for a in args {
        w.s(a);
    }
    w.finish()
}

/// Typed line in the chat window (system 9, world 3, clan 4, party 11, trade 12).
pub fn build_chat_line(kind: u8, text: &str) -> Bytes {
    let mut w = Writer::new(S_MESSAGE);
    w.c(kind).s(text);
    w.finish()
}

pub fn build_system_message(text: &str) -> Bytes {
    build_chat_line(9, text)
}

pub fn build_say(sender: u32, name: &str, text: &str) -> Bytes {
    let mut w = Writer::new(S_SAY);
    w.c(0).d(sender as i32).s(&format!("{}: {}", name, text));
    w.finish()
}

pub fn build_shout(sender: u32, name: &str, text: &str, x: i32, y: i32) -> Bytes {
    let mut w = Writer::new(S_SAY);
    w.c(2).d(sender as i32).s(&format!("<{}> {}", name, text)).h(x as u16).h(y as u16);
    w.finish()
}

pub fn build_npc_say(npc: u32, text: &str) -> Bytes {
    let mut w = Writer::new(S_SAY);
    w.d(npc as i32).c(2).s(text);
    w.finish()
}

pub fn build_tell(sender: &str, text: &str) -> Bytes {
    let mut w = Writer::new(S_TELL);
    w.s(sender).s(text);
    w.finish()
}

/// NPC dialog page, optionally with substitution values.
pub fn build_hypertext(obj_id: u32, html_id: &str, data: &[String]) -> Bytes {
    let mut w = Writer::new(S_HYPERTEXT);
    w.d(obj_id as i32).s(html_id);
    if data.is_empty() {
        w.h(0).h(0);
    } else {
        w.h(1).h(data.len() as u16);
        for v in data {
            w.s(v);
        }
    }
    w.finish()
}

pub fn build_party_who(self_obj: u32, leader: &str, names: &str) -> Bytes {
    let mut w = Writer::new(S_HYPERTEXT);
    w.d(self_obj as i32).s("party").h(1).h(2).s(leader).s(names);
    w.finish()
}

pub fn build_pet_menu(c: &Companion) -> Bytes {
    let status = match c.mode.status() {
        1 => "$469",
        2 => "$470",
        5 => "$472",
        _ => "$471",
    };
    let mut w = Writer::new(S_HYPERTEXT);
    w.d(c.obj_id as i32)
        .s("anicom")
        .c(0)
        .h(10)
        .s(status)
        .s(&c.hp.to_string())
        .s(&c.max_hp.to_string())
        .s("0")
        .s("0")
        .s(&c.level.to_string())
        .s(&c.name)
        .s("$611")
        .s("0")
        .s("0");
    w.finish()
}

// ============================================
// Trade
// ============================================

pub fn build_trade_open(partner: &str) -> Bytes {
    let mut w = Writer::new(S_TRADE);
    w.d(0).s(partner);
    w.finish()
}

/// `panel` 0 is the owner's side, 1 the partner's.
pub fn build_trade_add(panel: u8, inv_gfx: u16, view_name: &str, bless: u8) -> Bytes {
    let mut w = Writer::new(S_TRADE_ADD_ITEM);
    w.c(panel).h(inv_gfx).s(view_name).c(bless).c(0).h(0);
    w.finish()
}

/// 0 completed, 1 cancelled.
pub fn build_trade_status(status: u8) -> Bytes {
    let mut w = Writer::new(S_TRADE_STATUS);
    w.c(status);
    w.finish()
}

// ============================================
// Party
// ============================================

/// A party member as the party window shows it.
pub struct PartyRow<'a> {
    pub char_id: i32,
    pub name: &'a str,
    pub hp_ratio: u8,
    pub map: i32,
    pub x: i32,
    pub y: i32,
}

/// Full list for a member who just joined. `rows[0]` is the leader.
pub fn build_party_list(rows: &[PartyRow<'_>]) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_PARTY_LIST).c(rows.len().saturating_sub(1) as u8);
    for r in rows {
        w.d(r.char_id).s(r.name).c(r.hp_ratio).d(r.map).h(r.x as u16).h(r.y as u16);
    }
    w.c(0);
    w.finish()
}

pub fn build_party_new_member(r: &PartyRow<'_>) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_PARTY_NEW_MEMBER).d(r.char_id).s(r.name).d(r.map).h(r.x as u16).h(r.y as u16);
    w.finish()
}

pub fn build_party_refresh(rows: &[PartyRow<'_>]) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_PARTY_REFRESH).c(rows.len() as u8);
    for r in rows {
        w.d(r.char_id).d(r.map).h(r.x as u16).h(r.y as u16);
    }
    w.c(0xff).c(0xff);
    w.finish()
}

pub fn build_party_set_master(leader: i32) -> Bytes {
    let mut w = Writer::new(S_EVENT);
    w.c(EV_PARTY_SET_MASTER).d(leader).h(0);
    w.finish()
}

// ============================================
// Warehouse
// ============================================

/// One warehouse row as the client sees it: a transient id, never the row id.
pub struct RetrieveRow<'a> {
    pub temp_id: u32,
    pub template: Option<&'a ItemTemplate>,
    pub count: i32,
    pub enchant: i32,
    pub bless: u8,
}

pub fn build_retrieve_list(npc_obj: u32, kind: u8, rows: &[RetrieveRow<'_>], fee: i32) -> Bytes {
    let mut w = Writer::new(S_RETRIEVE_LIST);
    w.d(npc_obj as i32).h(rows.len() as u16).c(kind);
    for r in rows {
        let view = InvItem {
            obj_id: r.temp_id,
            item_id: r.template.map(|t| t.id).unwrap_or(0),
            count: r.count,
            enchant: r.enchant,
            bless: crate::game::types::Bless::from_wire(r.bless),
            identified: true,
            equipped: false,
            stackable: r.template.map(|t| t.is_stackable()).unwrap_or(false),
        };
        w.d(r.temp_id as i32)
            .c(r.template.map(|t| t.use_type).unwrap_or(0))
            .h(r.template.map(|t| t.inv_gfx).unwrap_or(0))
            .c(r.bless)
            .d(r.count)
            .c(1)
            .s(&item_view_name(&view, r.template));
    }
    w.d(fee);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{Bless, StatDelta};
    use crate::network::packet::Reader;
    use crate::world::player::test_support::player;

    fn content() -> Content {
        Content::from_yaml(
            "items: [{id: 40308, name: adena, stackable: true, weight: 0}, {id: 20, name: sword, slot: weapon, inv_gfx: 7}]",
            "",
            "",
            "",
        )
        .unwrap()
    }

    fn sword(enchant: i32, equipped: bool) -> InvItem {
        InvItem {
            obj_id: 500,
            item_id: 20,
            count: 1,
            enchant,
            bless: Bless::Normal,
            identified: true,
            equipped,
            stackable: false,
        }
    }

    #[test]
    fn test_item_view_name() {
        let c = content();
        let t = c.items.get(20);
        assert_eq!(item_view_name(&sword(3, false), t), "+3 sword");
        assert_eq!(item_view_name(&sword(-1, false), t), "-1 sword");
        assert_eq!(item_view_name(&sword(0, true), t), "sword ($9)");
        let mut gold = sword(0, false);
        gold.item_id = 40308;
        gold.count = 250;
        assert_eq!(item_view_name(&gold, c.items.get(40308)), "adena (250)");
    }

    #[test]
    fn test_character_summary_checksum() {
        let row = CharacterRow {
            name: "Alice".into(),
            level: 5,
            base: StatDelta { str_: 16, dex: 12, con: 14, wis: 9, cha: 12, intel: 8, ..Default::default() },
            ..Default::default()
        };
        let pkt = build_character_info(&row);
        let mut r = Reader::new(&pkt);
        assert_eq!(r.opcode(), S_CHARACTER_INFO);
        assert_eq!(r.s().unwrap(), "Alice");
        assert_eq!(r.s().unwrap(), "");
        r.bytes(2 + 2 + 2 + 2 + 1).unwrap();
        assert_eq!(r.c().unwrap(), 5);
        r.bytes(6 + 1 + 4).unwrap();
        assert_eq!(r.c().unwrap(), 5 ^ 16 ^ 12 ^ 14 ^ 9 ^ 12 ^ 8);
    }

    #[test]
    fn test_enter_world_check_variants() {
        let none = build_enter_world_check(None);
        assert_eq!(&none[..8], &[S_ENTER_WORLD_CHECK, 3, 0x53, 1, 0, 0x8b, 0x9c, 0x1f]);
        let clan = build_enter_world_check(Some(7));
        assert_eq!(&clan[..8], &[S_ENTER_WORLD_CHECK, 3, 7, 0, 0, 0, 0x9c, 0x1f]);
    }

    #[test]
    fn test_status_game_time_is_rounded() {
        let (p, _rx) = player(1, 9, "Alice");
        let pkt = build_status(&p, &content(), 1_000_123);
        let mut r = Reader::new(&pkt);
        assert_eq!(r.d().unwrap(), 9);
        assert_eq!(r.c().unwrap(), 10);
        r.bytes(4 + 6 + 8 + 1).unwrap();
        assert_eq!(r.d().unwrap(), 1_000_123 - 1_000_123 % 300);
        assert_eq!(r.c().unwrap(), 40);
    }

    #[test]
    fn test_char_config_echo() {
        assert!(build_char_config(&[1, 0, 0, 0]).is_none());
        assert!(build_char_config(&[0, 0, 0, 0, 9]).is_none());
        let pkt = build_char_config(&[5, 0, 0, 0, 0xaa, 0xbb]).unwrap();
        assert_eq!(&pkt[..8], &[S_EVENT, EV_CHARACTER_CONFIG, 5, 0, 0, 0, 0xaa, 0xbb]);
    }

    #[test]
    fn test_bookmark_list_layout() {
        let marks = vec![Bookmark { id: 3, name: "home".into(), x: 100, y: 200, map: 4 }];
        let pkt = build_bookmarks(&marks);
        assert_eq!(&pkt[1..5], &[0x2a, 0x80, 0, 2]);
        assert_eq!(pkt[5], 0);
        assert_eq!(pkt[6], 0);
        let tail = 5 + 127;
        assert_eq!(&pkt[tail..tail + 4], &[0x3c, 0, 1, 0]);
        let mut r = Reader::new(&pkt[tail + 3..]);
        assert_eq!(r.h().unwrap(), 100);
        assert_eq!(r.h().unwrap(), 200);
        assert_eq!(r.s().unwrap(), "home");
    }

    #[test]
    fn test_pledge_member_notes_are_fixed_width() {
        let rows = [PledgeRow { name: "A", rank: 10, level: 0, notes: b"hi", char_id: 1, class_type: 0 }];
        let pkt = build_pledge_members(EV_PLEDGE_MEMBERS, &rows);
        let mut r = Reader::new(&pkt);
        assert_eq!(r.c().unwrap(), EV_PLEDGE_MEMBERS);
        assert_eq!(r.h().unwrap(), 1);
        assert_eq!(r.c().unwrap(), 1);
        assert_eq!(r.s().unwrap(), "A");
        r.bytes(2).unwrap();
        assert_eq!(&r.bytes(NOTES_LEN).unwrap()[..3], b"hi\0");
        assert_eq!(r.d().unwrap(), 1);
    }

    #[test]
    fn test_party_list_counts_non_leaders() {
        let rows = [
            PartyRow { char_id: 1, name: "L", hp_ratio: 100, map: 4, x: 1, y: 2 },
            PartyRow { char_id: 2, name: "M", hp_ratio: 50, map: 4, x: 3, y: 4 },
        ];
        let pkt = build_party_list(&rows);
        assert_eq!(&pkt[..3], &[S_EVENT, EV_PARTY_LIST, 1]);
        let refresh = build_party_refresh(&rows);
        assert_eq!(refresh[2], 2);
    }

    #[test]
    fn test_message_code_args() {
        let pkt = build_message_code(424, &["Bob"]);
        let mut r = Reader::new(&pkt);
        assert_eq!(r.h().unwrap(), 424);
        assert_eq!(r.c().unwrap(), 1);
        assert_eq!(r.s().unwrap(), "Bob");
    }
}
