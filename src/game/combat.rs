//! Physical attacks, damage, death and experience.
//!
//! Attack requests are queued by the handlers and resolved here from the
//! tick's ingest phase, so every function runs under the tick's write lock.
//! Hit and damage numbers always come from [`StatScripting`].

use std::sync::Arc;

use super::packets::*;
use super::scripting::{AttackCtx, StatScripting, LAWFUL_MAX, LAWFUL_MIN};
use super::{item, party, skill, trade, view};
use crate::core::secs_to_ticks;
use crate::database::item_db::EquipSlot;
use crate::database::mob_db::NpcSize;
use crate::game::types::{chebyshev, heading_to, ClassType, StatDelta};
use crate::network::opcodes::ACT_DIE;
use crate::tick::queue::AttackRequest;
use crate::world::aoi::EntityRef;
use crate::world::player::Player;
use crate::world::WorldState;

pub const MELEE_RANGE: i32 = 2;
pub const RANGED_RANGE: i32 = 10;
pub const MAX_LEVEL: i32 = 99;
pub const PINK_NAME_SECS: i32 = 180;
/// Killers at or above this lawful value do not gain a PK count.
const PK_COUNT_LAWFUL: i32 = 30000;

/// Weapon dice (small, large) of whatever the player wields.
fn weapon_dice(w: &WorldState, p: &Player) -> (i32, i32) {
    p.inventory
        .equipped()
        .filter_map(|i| w.content.items.get(i.item_id))
        .find(|t| t.slot == Some(EquipSlot::Weapon))
        .map(|t| (t.dmg_small, t.dmg_large))
        .unwrap_or((0, 0))
}

fn attack_ctx(w: &WorldState, p: &Player, ranged: bool) -> AttackCtx {
    let (small, large) = weapon_dice(w, p);
    AttackCtx {
        attacker_level: p.level,
        str_: p.stats.str_,
        dex: p.stats.dex,
        hit_bonus: p.stats.hit,
        dmg_bonus: p.stats.dmg,
        weapon_small: small,
        weapon_large: large,
        ranged,
        ..Default::default()
    }
}

fn swing_packet(w: &WorldState, attacker: &Player, target: u32, to: (i32, i32), dmg: i32, ranged: bool) -> bytes::Bytes {
    if ranged {
        build_attack_arrow(&RangedHit {
            attacker: attacker.object_id(),
            target,
            dmg,
            heading: attacker.heading,
            seq: (w.tick & 0x7fff_ffff) as i32,
            from: (attacker.x, attacker.y),
            to,
        })
    } else {
        build_attack_melee(attacker.object_id(), target, dmg, attacker.heading)
    }
}

/// Resolve one queued attack. Requests from sessions that left, dead or
/// immobile attackers and vanished targets are dropped.
pub fn resolve_attack(w: &mut WorldState, script: &dyn StatScripting, req: &AttackRequest) {
    let Some(p) = w.player(req.session_id) else {
        return;
    };
    if p.dead || p.is_immobile() {
        return;
    }
    match w.entity_by_object(req.target) {
        Some(EntityRef::Npc(id)) => attack_npc(w, script, req.session_id, id, req.ranged),
        Some(EntityRef::Player(target)) if target != req.session_id => {
            attack_player(w, script, req.session_id, target, req.ranged)
        }
        _ => {}
    }
}

fn in_reach(p: &Player, map: i32, x: i32, y: i32, ranged: bool) -> bool {
    let range = if ranged { RANGED_RANGE } else { MELEE_RANGE };
    p.map == map && chebyshev(p.x, p.y, x, y) <= range
}

fn face(w: &mut WorldState, sid: u64, x: i32, y: i32) {
    if let Some(p) = w.player_mut(sid) {
        p.heading = heading_to(p.x, p.y, x, y);
    }
}

fn attack_npc(w: &mut WorldState, script: &dyn StatScripting, sid: u64, npc_id: u32, ranged: bool) {
    let Some(npc) = w.npcs.get(&npc_id) else {
        return;
    };
    if npc.dead {
        return;
    }
    let (map, nx, ny, attackable, level, ac) = (npc.map, npc.x, npc.y, npc.is_attackable(), npc.level, npc.ac);
    let large = w.content.npcs.get(npc.template_id).is_some_and(|t| t.size == NpcSize::Large);
    if !w.player(sid).is_some_and(|p| in_reach(p, map, nx, ny, ranged)) {
        return;
    }
    face(w, sid, nx, ny);
    let Some(p) = w.player(sid) else {
        return;
    };

    let dmg = if attackable {
        let mut ctx = attack_ctx(w, p, ranged);
        ctx.target_level = level;
        ctx.target_ac = ac;
        ctx.target_large = large;
        let r = script.melee(&ctx);
        if r.hit {
            r.damage.max(0)
        } else {
            0
        }
    } else {
        0
    };
    let pkt = swing_packet(w, p, npc_id, (nx, ny), dmg, ranged);
    w.broadcast_near(map, nx, ny, 0, &pkt);
    if dmg > 0 {
        damage_npc(w, script, sid, npc_id, dmg);
    }
}

/// Subtract HP from an NPC on behalf of `sid`. Returns true when it died.
pub fn damage_npc(w: &mut WorldState, script: &dyn StatScripting, sid: u64, npc_id: u32, dmg: i32) -> bool {
    let Some(npc) = w.npcs.get_mut(&npc_id) else {
        return false;
    };
    if !npc.is_attackable() {
        return false;
    }
    npc.hp -= dmg;
    npc.add_hate(sid, dmg);
    let (map, x, y, ratio, died) = (npc.map, npc.x, npc.y, npc.hp_ratio(), npc.hp <= 0);
    w.broadcast_near(map, x, y, 0, &build_hp_meter(npc_id, ratio));
    if died {
        npc_died(w, script, npc_id, sid);
        return true;
    }
    false
}

/// Death of an NPC: animation, experience split by damage share, lawful
/// adjustment for the killer.
pub fn npc_died(w: &mut WorldState, script: &dyn StatScripting, npc_id: u32, killer: u64) {
    let Some(npc) = w.npcs.get(&npc_id) else {
        return;
    };
    let mut shares: Vec<(u64, i32)> = npc.hate.iter().map(|(s, h)| (*s, *h)).collect();
    shares.sort_unstable();
    let (exp, lawful, map, x, y) = (npc.exp, npc.lawful, npc.map, npc.x, npc.y);
    w.kill_npc(npc_id);
    w.broadcast_near(map, x, y, 0, &build_action(npc_id, ACT_DIE));

    let total: i64 = shares.iter().map(|(_, h)| *h as i64).sum();
    if shares.len() > 1 && total > 0 && exp > 0 {
        for (s, h) in shares {
            let share = (exp as i64 * h as i64 / total) as i32;
            if share > 0 && w.player(s).is_some_and(|p| !p.dead) {
                add_exp(w, script, s, share);
            }
        }
    } else if exp > 0 {
        add_exp(w, script, killer, exp);
    }

    if lawful != 0 {
        if let Some(p) = w.player(killer) {
            let next = p.lawful.saturating_sub(lawful);
            set_lawful(w, killer, next);
        }
    }
    tracing::debug!("[combat] [npc_died] npc={} killer={} exp={}", npc_id, killer, exp);
}

/// Grant experience, levelling up as often as the total allows.
pub fn add_exp(w: &mut WorldState, script: &dyn StatScripting, sid: u64, amount: i32) {
    let Some(p) = w.player_mut(sid) else {
        return;
    };
    p.exp = p.exp.saturating_add(amount.max(0));
    let mut leveled = false;
    while p.level < MAX_LEVEL && p.exp >= script.exp_for_level(p.level + 1) {
        p.level += 1;
        leveled = true;
        let class = ClassType::from_i32(p.class_type).unwrap_or(ClassType::Knight);
        let (hp, mp) = script.level_up(class, p.stats.con, p.stats.wis);
        p.apply_delta(&StatDelta { max_hp: hp, max_mp: mp, ..Default::default() });
        p.hp = p.stats.max_hp;
        p.mp = p.stats.max_mp;
    }
    p.session.send(build_exp(p.level, p.exp));
    if leveled {
        tracing::info!("[combat] [level_up] session={} level={} max_hp={}", sid, p.level, p.stats.max_hp);
        item::send_status(w, sid);
        party::broadcast_hp(w, sid);
    }
}

/// Store a clamped lawful value and show it to everyone around.
pub fn set_lawful(w: &mut WorldState, sid: u64, value: i32) {
    let Some(p) = w.player_mut(sid) else {
        return;
    };
    p.lawful = value.clamp(LAWFUL_MIN, LAWFUL_MAX);
    let pkt = build_lawful(p.object_id(), p.lawful);
    w.broadcast_with_self(sid, &pkt);
}

// ============================================
// Player versus player
// ============================================

fn attack_player(w: &mut WorldState, script: &dyn StatScripting, sid: u64, target: u64, ranged: bool) {
    let Some(t) = w.player(target) else {
        return;
    };
    if t.dead {
        return;
    }
    let (map, tx, ty, t_obj, t_level, t_ac) = (t.map, t.x, t.y, t.object_id(), t.level, t.stats.ac);
    if !w.player(sid).is_some_and(|p| in_reach(p, map, tx, ty, ranged)) {
        return;
    }
    face(w, sid, tx, ty);
    mark_pink(w, sid, target);
    let Some(p) = w.player(sid) else {
        return;
    };
    let mut ctx = attack_ctx(w, p, ranged);
    ctx.target_level = t_level;
    ctx.target_ac = t_ac;
    let r = script.melee(&ctx);
    let dmg = if r.hit { r.damage.max(0) } else { 0 };
    let pkt = swing_packet(w, p, t_obj, (tx, ty), dmg, ranged);
    w.broadcast_near(map, tx, ty, 0, &pkt);
    if dmg > 0 {
        damage_player(w, script, target, dmg, Some(sid));
    }
}

fn is_blue(p: &Player) -> bool {
    p.lawful >= 0 && p.timers.pink_name == 0
}

/// A lawful attacker striking a blue victim turns pink for a while.
pub fn mark_pink(w: &mut WorldState, attacker: u64, victim: u64) {
    let victim_blue = w.player(victim).is_some_and(is_blue);
    let Some(a) = w.player_mut(attacker) else {
        return;
    };
    if !victim_blue || !is_blue(a) {
        return;
    }
    a.timers.pink_name = secs_to_ticks(PINK_NAME_SECS as u64) as u32;
    let pkt = build_pink_name(a.object_id(), PINK_NAME_SECS);
    w.broadcast_with_self(attacker, &pkt);
}

/// Subtract HP from a player. `attacker` is set for player kills. Returns
/// true when the player died.
pub fn damage_player(w: &mut WorldState, script: &dyn StatScripting, sid: u64, dmg: i32, attacker: Option<u64>) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if p.dead {
        return false;
    }
    p.hp = (p.hp - dmg.max(0)).max(0);
    p.session.send(build_hit_point(p.hp, p.stats.max_hp));
    let (dead, blue) = (p.hp == 0, is_blue(p));
    party::broadcast_hp(w, sid);
    if !dead {
        return false;
    }
    kill_player(w, script, sid);
    if let Some(killer) = attacker.filter(|&k| k != sid) {
        if blue {
            pk_kill(w, script, killer);
        }
    }
    true
}

fn pk_kill(w: &mut WorldState, script: &dyn StatScripting, killer: u64) {
    let Some(k) = w.player_mut(killer) else {
        return;
    };
    let was_pink = k.timers.pink_name > 0;
    k.timers.pink_name = 0;
    if k.lawful < PK_COUNT_LAWFUL {
        k.pk_count += 1;
    }
    let (obj, level, lawful, count) = (k.object_id(), k.level, k.lawful, k.pk_count);
    if was_pink {
        w.broadcast_with_self(killer, &build_pink_name(obj, 0));
    }
    set_lawful(w, killer, script.pk_lawful(level, lawful));
    tracing::info!("[combat] [pk] killer={} pk_count={}", killer, count);
}

/// Death of a player: tile vacated, death animation, buffs cleared and the
/// experience penalty applied.
pub fn kill_player(w: &mut WorldState, script: &dyn StatScripting, sid: u64) {
    if w.player(sid).is_none_or(|p| p.dead) {
        return;
    }
    trade::cancel(w, sid);
    if let Some(p) = w.player_mut(sid) {
        p.hp = 0;
    }
    w.set_player_dead(sid, true);
    for npc in w.npcs.values_mut() {
        npc.forget(sid);
    }

    let Some(p) = w.player_mut(sid) else {
        return;
    };
    let ended = p.clear_buffs();
    let penalty = script.exp_penalty(p.level, p.exp);
    p.exp -= penalty;
    p.session.send(build_hit_point(0, p.stats.max_hp));
    p.session.send(build_exp(p.level, p.exp));
    let obj = p.object_id();
    for b in &ended {
        skill::announce_buff_end(w, sid, b);
    }
    w.broadcast_with_self(sid, &build_action(obj, ACT_DIE));
    tracing::info!("[combat] [player_died] session={} exp_lost={}", sid, penalty);
}

/// Bring a dead player back at the respawn point with a fresh view.
pub fn restart(w: &mut WorldState, script: &dyn StatScripting, sid: u64) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if !p.dead {
        return false;
    }
    let (hp, mp) = script.resurrect_effect(p.level);
    p.hp = hp;
    p.mp = mp;
    p.clamp_pools();
    let (x, y, map) = script.respawn_point(p.map);
    let heading = p.heading;
    let content = Arc::clone(&w.content);
    w.set_player_dead(sid, false);
    view::teleport_player(w, sid, x, y, map, heading);
    if let Some(p) = w.player(sid) {
        p.session.send(build_hit_point(p.hp, p.stats.max_hp));
        p.session.send(build_mana_point(p.mp, p.stats.max_mp));
        p.session.send(build_weight(weight242(p, &content)));
    }
    party::broadcast_hp(w, sid);
    tracing::info!("[combat] [restart] session={} map={} x={} y={}", sid, map, x, y);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::game::scripting::test_support::Fixed;
    use crate::network::opcodes::*;
    use crate::world::entities::Npc;
    use crate::world::player::test_support::player;
    use crate::world::player::{ActiveBuff, BuffFlags};
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    const NPCS: &str = r#"
npcs:
  - { id: 45001, name: goblin, gfx: 145, hp: 20, exp: 50, lawful: -10 }
  - { id: 70001, name: merchant, gfx: 200, hp: 100, kind: merchant }
"#;

    fn world() -> WorldState {
        WorldState::new(Arc::new(Content::from_yaml("", NPCS, "", "").unwrap()))
    }

    fn spawn(w: &mut WorldState, template: i32, obj: u32, x: i32, y: i32) {
        let t = w.content.npcs.get(template).unwrap().clone();
        let sp = crate::database::mob_db::SpawnPoint { npc: template, map: 4, x, y, heading: 0, count: 1, respawn_secs: 10 };
        w.add_npc(Npc::spawn(obj, &t, &sp));
    }

    fn attack(sid: u64, target: u32) -> AttackRequest {
        AttackRequest { session_id: sid, target, ranged: false, x: 0, y: 0 }
    }

    fn ops(rx: &mut UnboundedReceiver<Bytes>) -> Vec<u8> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|p| p[0]).collect()
    }

    #[test]
    fn test_melee_kill_grants_exp_and_lawful() {
        let mut w = world();
        let (a, mut ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        spawn(&mut w, 45001, 9, 32769, 32768);

        resolve_attack(&mut w, &Fixed(15), &attack(1, 9));
        assert_eq!(w.npcs[&9].hp, 5);
        assert_eq!(w.npcs[&9].target, Some(1));
        resolve_attack(&mut w, &Fixed(15), &attack(1, 9));
        assert!(w.npcs[&9].dead);
        assert_eq!(w.content.maps.occupied_count(4, 32769, 32768), 0);

        let p = w.player(1).unwrap();
        assert_eq!(p.exp, 50);
        assert_eq!(p.lawful, 10);
        let seen = ops(&mut ra);
        assert!(seen.contains(&S_ATTACK));
        assert!(seen.contains(&S_HP_METER));
        assert!(seen.contains(&S_ACTION));
        assert!(seen.contains(&S_EXP));
    }

    #[test]
    fn test_out_of_range_and_merchant() {
        let mut w = world();
        let (a, mut ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        spawn(&mut w, 45001, 9, 32772, 32768);
        spawn(&mut w, 70001, 10, 32768, 32769);

        resolve_attack(&mut w, &Fixed(5), &attack(1, 9));
        assert_eq!(w.npcs[&9].hp, 20);
        assert!(ops(&mut ra).is_empty());

        resolve_attack(&mut w, &Fixed(5), &attack(1, 10));
        assert_eq!(w.npcs[&10].hp, 100);
        assert_eq!(ops(&mut ra), vec![S_ATTACK]);

        let ranged = AttackRequest { ranged: true, ..attack(1, 9) };
        resolve_attack(&mut w, &Fixed(5), &ranged);
        assert_eq!(w.npcs[&9].hp, 15);
    }

    #[test]
    fn test_exp_split_by_damage_share() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, _rb) = player(2, 101, "Bob");
        b.y += 1;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        spawn(&mut w, 45001, 9, 32769, 32768);
        damage_npc(&mut w, &Fixed(0), 2, 9, 5);
        damage_npc(&mut w, &Fixed(0), 1, 9, 15);
        assert!(w.npcs[&9].dead);
        assert_eq!(w.player(1).unwrap().exp, 37);
        assert_eq!(w.player(2).unwrap().exp, 12);
    }

    #[test]
    fn test_level_up_raises_pools() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        add_exp(&mut w, &Fixed(0), 1, 1050);
        let p = w.player(1).unwrap();
        assert_eq!(p.level, 11);
        assert_eq!(p.stats.max_hp, 110);
        assert_eq!(p.hp, 110);
        assert_eq!(p.base_stats().max_hp, 110);
    }

    #[test]
    fn test_pvp_pink_name_and_pk() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, mut rb) = player(2, 101, "Bob");
        b.x += 1;
        b.hp = 30;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();

        resolve_attack(&mut w, &Fixed(10), &attack(1, 101));
        assert!(w.player(1).unwrap().timers.pink_name > 0);
        assert_eq!(w.player(2).unwrap().hp, 20);
        assert!(ops(&mut rb).contains(&S_PINK_NAME));

        resolve_attack(&mut w, &Fixed(25), &attack(1, 101));
        let victim = w.player(2).unwrap();
        assert!(victim.dead);
        assert_eq!(w.content.maps.occupied_count(4, 32769, 32768), 0);
        let killer = w.player(1).unwrap();
        assert_eq!(killer.pk_count, 1);
        assert_eq!(killer.lawful, -1000);
        assert_eq!(killer.timers.pink_name, 0);
    }

    #[test]
    fn test_death_clears_buffs_and_restart_respawns() {
        let mut w = world();
        let (mut a, mut ra) = player(1, 100, "Alice");
        a.exp = 1000;
        a.add_buff(ActiveBuff {
            skill_id: 43,
            remaining_ticks: 100,
            delta: StatDelta { str_: 3, ..Default::default() },
            flags: BuffFlags::default(),
            icon: 0,
        });
        w.add_player(a).unwrap();
        spawn(&mut w, 45001, 9, 32769, 32768);
        w.npcs.get_mut(&9).unwrap().add_hate(1, 4);

        assert!(damage_player(&mut w, &Fixed(0), 1, 500, None));
        let p = w.player(1).unwrap();
        assert!(p.dead);
        assert!(p.buffs.is_empty());
        assert_eq!(p.stats.str_, 16);
        assert_eq!(p.exp, 900);
        assert_eq!(w.npcs[&9].target, None);
        assert_eq!(w.content.maps.occupied_count(4, 32768, 32768), 0);
        ops(&mut ra);

        assert!(restart(&mut w, &Fixed(0), 1));
        let p = w.player(1).unwrap();
        assert!(!p.dead);
        assert_eq!((p.hp, p.mp), (10, 5));
        assert_eq!((p.x, p.y, p.map), (33089, 33397, 4));
        assert_eq!(w.content.maps.occupied_count(4, 33089, 33397), 1);
        assert!(ops(&mut ra).contains(&S_WORLD));
        assert!(!restart(&mut w, &Fixed(0), 1));
    }
}
