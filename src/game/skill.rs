//! Spell casting, buffs and teleport magic.

use super::combat;
use super::packets::*;
use super::scripting::{SkillCtx, StatScripting};
use super::{item, party, trade, view};
use crate::core::{ms_to_ticks, secs_to_ticks};
use crate::database::magic_db::{SkillTarget, SkillTemplate, SKILL_MASS_TELEPORT, SKILL_TELEPORT};
use crate::game::types::chebyshev;
use crate::network::opcodes::{ACT_SKILL_ATTACK, ACT_SKILL_BUFF, TELEPORT_UNLOCK};
use crate::tick::queue::SkillRequest;
use crate::world::aoi::{EntityRef, SCREEN_RADIUS};
use crate::world::player::{ActiveBuff, BuffFlags};
use crate::world::WorldState;

pub const MSG_NO_ESCAPE: u16 = 79;
pub const MSG_NO_TELEPORT: u16 = 276;
pub const MSG_NOT_ENOUGH_MP: u16 = 278;
pub const MSG_NOT_ENOUGH_HP: u16 = 279;
pub const MSG_CAST_FAILED: u16 = 280;

/// Reuse delay for skills that do not name one.
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;
pub const RANDOM_TELEPORT_SPREAD: i32 = 200;
const RANDOM_TELEPORT_ATTEMPTS: usize = 40;
/// Clan members this close to the caster ride along on a mass teleport.
pub const MASS_TELEPORT_RANGE: i32 = 3;
const TELEPORT_HEADING: u8 = 5;
const SPEED_HASTE: u8 = 1;
/// use_type for a single-target spell projectile
const USE_SINGLE: u8 = 6;

fn msg(w: &WorldState, sid: u64, code: u16) {
    w.send_to(sid, build_message_code(code, &[]));
}

/// Resolve one queued cast.
pub fn cast(w: &mut WorldState, script: &dyn StatScripting, req: &SkillRequest) {
    let sid = req.session_id;
    let Some(p) = w.player(sid) else {
        return;
    };
    if p.dead || p.is_immobile() {
        return;
    }
    let Some(skill) = w.content.skills.get(req.skill_id).cloned() else {
        tracing::debug!("[skill] [unknown] session={} skill_id={}", sid, req.skill_id);
        return;
    };
    if !p.known_spells.contains(&skill.id) {
        msg(w, sid, MSG_CAST_FAILED);
        return;
    }
    if p.cooldowns.get(&skill.id).is_some_and(|&ready| w.tick < ready) {
        return;
    }
    if skill.hp_consume > 0 && p.hp <= skill.hp_consume {
        msg(w, sid, MSG_NOT_ENOUGH_HP);
        return;
    }
    if skill.mp_consume > 0 && p.mp < skill.mp_consume {
        msg(w, sid, MSG_NOT_ENOUGH_MP);
        return;
    }
    if !skill.invisible {
        break_invisibility(w, sid);
    }

    if skill.target == SkillTarget::Teleport || skill.id == SKILL_TELEPORT || skill.id == SKILL_MASS_TELEPORT {
        teleport_spell(w, sid, &skill, req.target);
        return;
    }

    consume(w, sid, &skill);
    match skill.target {
        SkillTarget::Attack => attack_skill(w, script, sid, &skill, req.target),
        SkillTarget::Buff => {
            if let Some(t) = friendly_target(w, sid, &skill, req.target) {
                cast_animation(w, sid, t, &skill);
                apply_buff(w, script, t, &skill, caster_level(w, sid));
            }
        }
        SkillTarget::Heal => {
            if let Some(t) = friendly_target(w, sid, &skill, req.target) {
                cast_animation(w, sid, t, &skill);
                heal(w, script, sid, t, &skill);
            }
        }
        SkillTarget::SelfOnly | SkillTarget::Teleport => {
            cast_animation(w, sid, sid, &skill);
            apply_buff(w, script, sid, &skill, caster_level(w, sid));
        }
    }
    tracing::debug!("[skill] [cast] session={} skill_id={} target={}", sid, skill.id, req.target);
}

fn caster_level(w: &WorldState, sid: u64) -> i32 {
    w.player(sid).map(|p| p.level).unwrap_or(1)
}

/// Pay MP and HP and start the reuse delay.
fn consume(w: &mut WorldState, sid: u64, skill: &SkillTemplate) {
    let tick = w.tick;
    let Some(p) = w.player_mut(sid) else {
        return;
    };
    if skill.mp_consume > 0 {
        p.mp = (p.mp - skill.mp_consume).max(0);
        p.session.send(build_mana_point(p.mp, p.stats.max_mp));
    }
    if skill.hp_consume > 0 {
        p.hp = (p.hp - skill.hp_consume).max(1);
        p.session.send(build_hit_point(p.hp, p.stats.max_hp));
    }
    let delay = if skill.cooldown_ms > 0 { skill.cooldown_ms } else { DEFAULT_COOLDOWN_MS };
    p.cooldowns.insert(skill.id, tick + ms_to_ticks(delay));
}

fn cast_animation(w: &WorldState, caster: u64, target: u64, skill: &SkillTemplate) {
    let Some(c) = w.player(caster) else {
        return;
    };
    w.broadcast_with_self(caster, &build_action(c.object_id(), ACT_SKILL_BUFF));
    if skill.cast_gfx > 0 {
        if let Some(t) = w.player(target) {
            w.broadcast_with_self(target, &build_effect(t.object_id(), skill.cast_gfx));
        }
    }
}

/// The player a buff or heal lands on: the caster when untargeted.
fn friendly_target(w: &WorldState, sid: u64, skill: &SkillTemplate, target_obj: u32) -> Option<u64> {
    let me = w.player(sid)?;
    if target_obj == 0 || target_obj == me.object_id() {
        return Some(sid);
    }
    let Some(EntityRef::Player(t)) = w.entity_by_object(target_obj) else {
        return None;
    };
    let other = w.player(t)?;
    let range = if skill.range > 0 { skill.range } else { SCREEN_RADIUS };
    (other.map == me.map && !other.dead && chebyshev(me.x, me.y, other.x, other.y) <= range).then_some(t)
}

fn attack_skill(w: &mut WorldState, script: &dyn StatScripting, sid: u64, skill: &SkillTemplate, target_obj: u32) {
    let Some(me) = w.player(sid) else {
        return;
    };
    let (obj, map, x, y, level, intel, sp) = (me.object_id(), me.map, me.x, me.y, me.level, me.stats.intel, me.stats.sp);
    let (target, tx, ty, tmap, mr) = match w.entity_by_object(target_obj) {
        Some(EntityRef::Npc(id)) => match w.npcs.get(&id) {
            Some(n) if n.is_attackable() => (EntityRef::Npc(id), n.x, n.y, n.map, 0),
            _ => return,
        },
        Some(EntityRef::Player(t)) if t != sid => match w.player(t) {
            Some(o) if !o.dead => (EntityRef::Player(t), o.x, o.y, o.map, o.stats.mr),
            _ => return,
        },
        _ => return,
    };
    let range = if skill.range > 0 { skill.range } else { combat::RANGED_RANGE };
    if tmap != map || chebyshev(x, y, tx, ty) > range {
        return;
    }

    let heading = crate::game::types::heading_to(x, y, tx, ty);
    if let Some(p) = w.player_mut(sid) {
        p.heading = heading;
    }
    let r = script.skill_damage(&SkillCtx {
        skill_id: skill.id,
        power: skill.power,
        caster_level: level,
        intel,
        sp,
        target_mr: mr,
    });
    let dmg = (r.damage * r.hit_count.max(1)).max(0);
    let hit = RangedHit {
        attacker: obj,
        target: target_obj,
        dmg,
        heading,
        seq: (w.tick & 0x7fff_ffff) as i32,
        from: (x, y),
        to: (tx, ty),
    };
    w.broadcast_near(map, tx, ty, 0, &build_attack_skill(&hit, skill.cast_gfx, USE_SINGLE));
    w.broadcast_with_self(sid, &build_action(obj, ACT_SKILL_ATTACK));

    match target {
        EntityRef::Npc(id) => {
            combat::damage_npc(w, script, sid, id, dmg);
        }
        EntityRef::Player(t) => {
            combat::mark_pink(w, sid, t);
            combat::damage_player(w, script, t, dmg, Some(sid));
        }
        _ => {}
    }
    if r.drain_mp > 0 {
        if let Some(p) = w.player_mut(sid) {
            p.mp = (p.mp + r.drain_mp).min(p.stats.max_mp);
            p.session.send(build_mana_point(p.mp, p.stats.max_mp));
        }
    }
}

fn heal(w: &mut WorldState, script: &dyn StatScripting, caster: u64, target: u64, skill: &SkillTemplate) {
    let Some(c) = w.player(caster) else {
        return;
    };
    let amount = script.heal(skill.power, c.level, c.stats.wis);
    let Some(t) = w.player_mut(target) else {
        return;
    };
    t.hp = (t.hp + amount.max(0)).min(t.stats.max_hp);
    t.session.send(build_hit_point(t.hp, t.stats.max_hp));
    party::broadcast_hp(w, target);
}

// ============================================
// Buffs
// ============================================

/// Start (or restart) a buff on `target`. Skills without a duration only
/// play their effect.
pub fn apply_buff(w: &mut WorldState, script: &dyn StatScripting, target: u64, skill: &SkillTemplate, caster_level: i32) {
    if skill.duration <= 0 {
        return;
    }
    let buff = ActiveBuff {
        skill_id: skill.id,
        remaining_ticks: secs_to_ticks(skill.duration as u64) as u32,
        delta: script.buff_effect(skill, caster_level),
        flags: BuffFlags { haste: skill.haste, brave: skill.brave, invisible: skill.invisible },
        icon: skill.icon,
    };
    let Some(p) = w.player_mut(target) else {
        return;
    };
    p.add_buff(buff.clone());
    announce_buff_start(w, target, &buff, skill.duration.clamp(0, u16::MAX as i32) as u16);
    tracing::debug!("[skill] [buff_start] session={} skill_id={}", target, skill.id);
}

fn announce_buff_start(w: &mut WorldState, sid: u64, buff: &ActiveBuff, secs: u16) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (obj, map, x, y) = (p.object_id(), p.map, p.x, p.y);
    if buff.icon > 0 {
        p.session.send(build_buff_icon(buff.icon, secs));
    }
    if buff.flags.haste {
        p.session.send(build_speed(obj, SPEED_HASTE, secs));
        w.broadcast_near(map, x, y, sid, &build_speed(obj, SPEED_HASTE, 0));
    }
    if buff.flags.invisible {
        p.session.send(build_invis(obj, true));
        w.mark_dirty_near(map, x, y);
    }
    send_stat_refresh(w, sid, buff);
}

/// Client side of a buff ending. The stats were already reverted.
pub fn announce_buff_end(w: &mut WorldState, sid: u64, buff: &ActiveBuff) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (obj, map, x, y) = (p.object_id(), p.map, p.x, p.y);
    if buff.icon > 0 {
        p.session.send(build_buff_icon(buff.icon, 0));
    }
    if buff.flags.haste && !p.has_haste() {
        w.broadcast_with_self(sid, &build_speed(obj, 0, 0));
    }
    if buff.flags.invisible && !p.is_invisible() {
        p.session.send(build_invis(obj, false));
        w.mark_dirty_near(map, x, y);
    }
    send_stat_refresh(w, sid, buff);
}

fn send_stat_refresh(w: &WorldState, sid: u64, buff: &ActiveBuff) {
    if buff.delta.is_zero() {
        return;
    }
    item::send_status(w, sid);
    if let Some(p) = w.player(sid) {
        if buff.delta.sp != 0 || buff.delta.mr != 0 {
            p.session.send(build_magic_status(p.stats.sp, p.stats.mr));
        }
    }
}

/// Casting or attacking reveals an invisible player.
pub fn break_invisibility(w: &mut WorldState, sid: u64) {
    let Some(p) = w.player_mut(sid) else {
        return;
    };
    if !p.is_invisible() {
        return;
    }
    p.timers.invis = 0;
    let ids: Vec<i32> = p.buffs.iter().filter(|b| b.flags.invisible).map(|b| b.skill_id).collect();
    let ended: Vec<ActiveBuff> = ids.into_iter().filter_map(|id| p.remove_buff(id)).collect();
    if ended.is_empty() {
        let (obj, map, x, y) = (p.object_id(), p.map, p.x, p.y);
        p.session.send(build_invis(obj, false));
        w.mark_dirty_near(map, x, y);
    }
    for b in &ended {
        announce_buff_end(w, sid, b);
    }
}

/// Age every buff by one tick and revert the expired ones. Returns the
/// number of buffs that ended.
pub fn tick_buffs(w: &mut WorldState) -> usize {
    let mut ended = Vec::new();
    for p in w.players_mut() {
        let mut expired = Vec::new();
        for b in &mut p.buffs {
            b.remaining_ticks = b.remaining_ticks.saturating_sub(1);
            if b.remaining_ticks == 0 {
                expired.push(b.skill_id);
            }
        }
        for id in expired {
            if let Some(b) = p.remove_buff(id) {
                ended.push((p.session_id, b));
            }
        }
    }
    let n = ended.len();
    for (sid, b) in ended {
        announce_buff_end(w, sid, &b);
        tracing::debug!("[skill] [buff_end] session={} skill_id={}", sid, b.skill_id);
    }
    n
}

// ============================================
// Teleport magic
// ============================================

fn unlock(w: &WorldState, sid: u64) {
    w.send_to(sid, build_paralysis(TELEPORT_UNLOCK));
}

/// A passable tile within the random-teleport spread of (x, y), clamped
/// to the map bounds.
fn random_spot(w: &WorldState, map: i32, x: i32, y: i32) -> Option<(i32, i32)> {
    let (mut lo_x, mut hi_x) = (x - RANDOM_TELEPORT_SPREAD, x + RANDOM_TELEPORT_SPREAD);
    let (mut lo_y, mut hi_y) = (y - RANDOM_TELEPORT_SPREAD, y + RANDOM_TELEPORT_SPREAD);
    if let Some(info) = w.content.maps.get(map) {
        lo_x = lo_x.max(info.start_x);
        hi_x = hi_x.min(info.end_x);
        lo_y = lo_y.max(info.start_y);
        hi_y = hi_y.min(info.end_y);
    }
    if hi_x <= lo_x || hi_y <= lo_y {
        return None;
    }
    (0..RANDOM_TELEPORT_ATTEMPTS)
        .map(|_| (rand::random_range(lo_x..=hi_x), rand::random_range(lo_y..=hi_y)))
        .find(|&(rx, ry)| w.content.maps.is_passable(map, rx, ry))
}

/// Teleport somewhere random on the current map. Refused on maps that do
/// not allow it. Returns true when the player moved.
pub fn random_teleport(w: &mut WorldState, sid: u64) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    if p.dead {
        unlock(w, sid);
        return false;
    }
    let (map, x, y) = (p.map, p.x, p.y);
    if !w.content.maps.is_teleportable(map) {
        msg(w, sid, MSG_NO_TELEPORT);
        unlock(w, sid);
        return false;
    }
    let (dx, dy) = random_spot(w, map, x, y).unwrap_or((x, y));
    trade::cancel(w, sid);
    view::teleport_player(w, sid, dx, dy, map, TELEPORT_HEADING)
}

/// Bookmark teleport when `bookmark_id` is set, random teleport otherwise.
/// Every refusal happens before MP is spent.
fn teleport_spell(w: &mut WorldState, sid: u64, skill: &SkillTemplate, bookmark_id: u32) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (map, x, y, clan_id) = (p.map, p.x, p.y, p.clan_id);
    let dest = if bookmark_id != 0 {
        if !w.content.maps.is_escapable(map) {
            msg(w, sid, MSG_NO_ESCAPE);
            unlock(w, sid);
            return;
        }
        match p.bookmarks.iter().find(|b| b.id as u32 == bookmark_id) {
            Some(b) => (b.x, b.y, b.map),
            None => {
                unlock(w, sid);
                return;
            }
        }
    } else {
        if !w.content.maps.is_teleportable(map) {
            msg(w, sid, MSG_NO_TELEPORT);
            unlock(w, sid);
            return;
        }
        let (dx, dy) = random_spot(w, map, x, y).unwrap_or((x, y));
        (dx, dy, map)
    };

    consume(w, sid, skill);
    cast_animation(w, sid, sid, skill);

    let riders: Vec<u64> = if skill.id == SKILL_MASS_TELEPORT && clan_id != 0 {
        w.nearby_players_within(map, x, y, MASS_TELEPORT_RANGE, sid)
            .into_iter()
            .filter(|&s| w.player(s).is_some_and(|o| o.clan_id == clan_id && !o.dead))
            .collect()
    } else {
        Vec::new()
    };

    let (dx, dy, dmap) = dest;
    trade::cancel(w, sid);
    view::teleport_player(w, sid, dx, dy, dmap, TELEPORT_HEADING);
    for r in riders {
        trade::cancel(w, r);
        view::teleport_player(w, r, dx, dy, dmap, TELEPORT_HEADING);
    }
    tracing::info!("[skill] [teleport] session={} skill_id={} map={} x={} y={}", sid, skill.id, dmap, dx, dy);
}
