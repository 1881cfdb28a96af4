//! Inventory changes with their client updates, and items on the ground.

use std::sync::Arc;

use super::packets::*;
use super::view;
use crate::database::item_db::{EquipSlot, ItemUse};
use crate::game::types::{chebyshev, ADENA_ITEM_ID};
use crate::network::opcodes::ACT_PICKUP;
use crate::world::entities::GroundItem;
use crate::world::inventory::{max_weight, Added, InvItem};
use crate::world::WorldState;

/// Ticks a dropped item stays on the ground (5 minutes).
pub const GROUND_TTL_TICKS: u32 = 1500;
/// Ticks only the dropper may pick an item up.
pub const GROUND_CLAIM_TICKS: u32 = 100;
pub const PICKUP_RANGE: i32 = 3;
pub const MAX_FOOD: i32 = 225;

const MSG_INVENTORY_FULL: u16 = 263;
const MSG_OVERWEIGHT: u16 = 82;
const POTION_GFX: u16 = 189;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn send_weight(w: &WorldState, sid: u64) {
    if let Some(p) = w.player(sid) {
        p.session.send(build_weight(weight242(p, &w.content)));
    }
}

pub fn send_status(w: &WorldState, sid: u64) {
    if let Some(p) = w.player(sid) {
        p.session.send(build_status(p, &w.content, unix_now()));
    }
}

/// Put an item into a player's inventory and tell the client.
/// Returns the object id it ended up under.
pub fn give_item(w: &mut WorldState, sid: u64, item: InvItem) -> Option<u32> {
    let content = Arc::clone(&w.content);
    let p = w.player_mut(sid)?;
    let added = p.inventory.add(item);
    let pkt = match added {
        Added::Merged(id) => p.inventory.get(id).map(|i| build_item_count(i, &content)),
        Added::New(id) => p.inventory.get(id).map(|i| build_add_item(i, &content)),
    };
    if let Some(pkt) = pkt {
        p.session.send(pkt);
    }
    p.session.send(build_weight(weight242(p, &content)));
    Some(added.obj_id())
}

pub fn give_gold(w: &mut WorldState, sid: u64, amount: i32) -> bool {
    if amount <= 0 {
        return false;
    }
    let obj = w.ids.next_object();
    give_item(w, sid, gold_item(obj, amount)).is_some()
}

pub fn gold_item(obj_id: u32, count: i32) -> InvItem {
    InvItem {
        obj_id,
        item_id: ADENA_ITEM_ID,
        count,
        enchant: 0,
        bless: Default::default(),
        identified: true,
        equipped: false,
        stackable: true,
    }
}

/// Take `count` of an entry out of a player's inventory and tell the
/// client. A partial take leaves the entry in place under its id.
pub fn take_item(w: &mut WorldState, sid: u64, obj_id: u32, count: i32) -> Option<InvItem> {
    let content = Arc::clone(&w.content);
    let split_id = w.ids.next_object();
    let p = w.player_mut(sid)?;
    let taken = p.inventory.take(obj_id, count, || split_id)?;
    match p.inventory.get(obj_id) {
        Some(left) => p.session.send(build_item_count(left, &content)),
        None => p.session.send(build_remove_inventory(obj_id)),
    }
    p.session.send(build_weight(weight242(p, &content)));
    Some(taken)
}

/// Deduct gold and update the client. False when the player is short.
pub fn spend_gold(w: &mut WorldState, sid: u64, amount: i32) -> bool {
    let content = Arc::clone(&w.content);
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    let Some(obj) = p.inventory.gold_obj() else {
        return amount <= 0;
    };
    if p.inventory.spend_gold(amount).is_none() {
        return false;
    }
    match p.inventory.get(obj) {
        Some(left) => p.session.send(build_item_count(left, &content)),
        None => p.session.send(build_remove_inventory(obj)),
    }
    true
}

/// Equip or unequip an item. Anything already in the slot comes off first.
pub fn toggle_equip(w: &mut WorldState, sid: u64, obj_id: u32) -> bool {
    let content = Arc::clone(&w.content);
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    let Some(item) = p.inventory.get(obj_id) else {
        return false;
    };
    let Some(slot) = content.items.get(item.item_id).and_then(|t| t.slot) else {
        return false;
    };
    let wearing = item.equipped;

    let mut changed = vec![obj_id];
    if !wearing {
        let others: Vec<u32> = p
            .inventory
            .equipped()
            .filter(|i| content.items.get(i.item_id).and_then(|t| t.slot) == Some(slot))
            .map(|i| i.obj_id)
            .collect();
        for o in others {
            if let Some(i) = p.inventory.get_mut(o) {
                i.equipped = false;
                changed.push(o);
            }
        }
    }
    if let Some(i) = p.inventory.get_mut(obj_id) {
        i.equipped = !wearing;
    }

    let bonus = p.inventory.equip_bonus(&content.items);
    p.set_equip_bonus(bonus);
    if slot == EquipSlot::Weapon {
        p.current_weapon = p
            .inventory
            .equipped()
            .filter_map(|i| content.items.get(i.item_id))
            .find(|t| t.slot == Some(EquipSlot::Weapon))
            .map(|t| t.weapon_visual)
            .unwrap_or(0);
    }
    for o in changed {
        if let Some(i) = p.inventory.get(o) {
            p.session.send(build_item_count(i, &content));
        }
    }
    p.session.send(build_status(p, &content, unix_now()));
    tracing::debug!("[item] [equip] session={} obj_id={} on={}", sid, obj_id, !wearing);
    true
}

/// Use an inventory item by its template effect. Returns false when the
/// item has no core effect so the caller may offer it to a collaborator.
pub fn use_item(w: &mut WorldState, sid: u64, obj_id: u32) -> bool {
    let Some(item) = w.player(sid).and_then(|p| p.inventory.get(obj_id)).cloned() else {
        return false;
    };
    let Some(t) = w.content.items.get(item.item_id).cloned() else {
        return false;
    };
    if w.player(sid).is_some_and(|p| p.dead) {
        return false;
    }
    match t.on_use {
        ItemUse::None => false,
        ItemUse::Equip => toggle_equip(w, sid, obj_id),
        ItemUse::Heal => {
            take_item(w, sid, obj_id, 1);
            if let Some(p) = w.player_mut(sid) {
                p.hp = (p.hp + t.power.max(1)).min(p.stats.max_hp);
                let (obj, hp, max) = (p.object_id(), p.hp, p.stats.max_hp);
                p.session.send(build_hit_point(hp, max));
                let fx = build_effect(obj, POTION_GFX);
                w.broadcast_with_self(sid, &fx);
            }
            super::party::broadcast_hp(w, sid);
            true
        }
        ItemUse::Food => {
            take_item(w, sid, obj_id, 1);
            if let Some(p) = w.player_mut(sid) {
                p.food = (p.food + t.power.max(1)).min(MAX_FOOD);
                p.session.send(build_food(p.food));
            }
            true
        }
        ItemUse::TeleportScroll => {
            if super::skill::random_teleport(w, sid) {
                take_item(w, sid, obj_id, 1);
            }
            true
        }
        ItemUse::Spellbook => {
            let learned = w.player(sid).is_some_and(|p| p.known_spells.contains(&t.skill_id));
            if t.skill_id <= 0 || learned {
                return true;
            }
            take_item(w, sid, obj_id, 1);
            let content = Arc::clone(&w.content);
            if let Some(p) = w.player_mut(sid) {
                p.known_spells.push(t.skill_id);
                p.session.send(build_skill_list(&content.skills.spell_bitmap(&p.known_spells)));
            }
            tracing::info!("[item] [spell_learned] session={} skill_id={}", sid, t.skill_id);
            true
        }
    }
}

/// Drop `count` of an entry at the player's feet.
pub fn drop_item(w: &mut WorldState, sid: u64, obj_id: u32, count: i32) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    if p.dead || p.trade.is_some() {
        return false;
    }
    let Some(item) = p.inventory.get(obj_id) else {
        return false;
    };
    if item.equipped {
        return false;
    }
    let (char_id, map, x, y) = (p.char_id, p.map, p.x, p.y);
    let count = count.clamp(1, item.count.max(1));
    let Some(mut dropped) = take_item(w, sid, obj_id, count) else {
        return false;
    };
    dropped.obj_id = w.ids.next_object();
    let ground_id = dropped.obj_id;
    w.add_ground(GroundItem {
        item: dropped,
        x,
        y,
        map,
        owner_char: char_id,
        claim_ticks: GROUND_CLAIM_TICKS,
        ttl_ticks: GROUND_TTL_TICKS,
    });
    view::refresh_observers(w, &[(map, x, y)], 0);
    tracing::debug!("[item] [dropped] session={} ground_id={} count={}", sid, ground_id, count);
    true
}

pub fn pick_up(w: &mut WorldState, sid: u64, ground_id: u32) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    let Some(g) = w.ground.get(&ground_id) else {
        return false;
    };
    if p.dead || g.map != p.map || chebyshev(p.x, p.y, g.x, g.y) > PICKUP_RANGE || !g.can_pick_up(p.char_id) {
        return false;
    }
    if p.inventory.is_full() && p.inventory.needs_slot(&g.item) {
        p.session.send(build_message_code(MSG_INVENTORY_FULL, &[]));
        return false;
    }
    let weight = w.content.items.get(g.item.item_id).map(|t| t.weight).unwrap_or(0);
    let max = max_weight(p.stats.str_, p.stats.con);
    if p.inventory.would_overload(&w.content.items, weight, g.item.count, max) {
        p.session.send(build_message_code(MSG_OVERWEIGHT, &[]));
        return false;
    }
    let obj = p.object_id();
    let Some(g) = w.remove_ground(ground_id) else {
        return false;
    };
    let (map, x, y) = (g.map, g.x, g.y);
    give_item(w, sid, g.item);
    w.broadcast_with_self(sid, &build_action(obj, ACT_PICKUP));
    view::refresh_observers(w, &[(map, x, y)], 0);
    true
}

pub fn destroy_item(w: &mut WorldState, sid: u64, obj_id: u32, count: i32) -> bool {
    let equipped = w.player(sid).and_then(|p| p.inventory.get(obj_id)).map(|i| i.equipped);
    if equipped != Some(false) {
        return false;
    }
    let Some(gone) = take_item(w, sid, obj_id, count) else {
        return false;
    };
    tracing::info!("[item] [destroyed] session={} item_id={} count={}", sid, gone.item_id, gone.count);
    true
}

/// Age every ground item by one tick. Expired items vanish and their
/// viewers are queued for a view flush. Returns how many expired.
pub fn tick_ground(w: &mut WorldState) -> usize {
    let mut expired = Vec::new();
    for g in w.ground.values_mut() {
        g.claim_ticks = g.claim_ticks.saturating_sub(1);
        g.ttl_ticks = g.ttl_ticks.saturating_sub(1);
        if g.ttl_ticks == 0 {
            expired.push(g.obj_id());
        }
    }
    for id in &expired {
        if let Some(g) = w.remove_ground(*id) {
            w.mark_dirty_near(g.map, g.x, g.y);
        }
    }
    expired.len()
}
