//! Monster and guard behaviour, run once per tick.
//!
//! Monsters keep a hate table filled by whoever damages them and fall back
//! to the top entry when their current target disappears. Aggressive
//! monsters also pick the closest visible player on their own. Guards hunt
//! pink-named players and walk back to their post when idle.
//!
//! Positions change through [`WorldState::move_npc`]; viewers are only
//! queued with `mark_dirty_near` and re-synced by the tick's flush.

use std::sync::Arc;

use super::combat;
use super::packets::*;
use super::scripting::{NpcAttackCtx, StatScripting};
use crate::database::mob_db::{NpcKind, NpcTemplate};
use crate::game::types::{chebyshev, heading_to};
use crate::world::WorldState;

/// Aggressive monsters and guards notice players this close.
pub const AGGRO_RANGE: i32 = 8;
/// Guards drop a chase and teleport home past this distance.
pub const GUARD_LEASH: i32 = 30;

/// Run every NPC for one tick. Returns the number that moved or attacked.
pub fn tick_npcs(w: &mut WorldState, script: &dyn StatScripting) -> usize {
    let mut ids: Vec<u32> = w.npcs.keys().copied().collect();
    ids.sort_unstable();
    let content = Arc::clone(&w.content);

    let mut acted = 0;
    for id in ids {
        let Some(npc) = w.npcs.get(&id) else {
            continue;
        };
        if npc.dead {
            if tick_corpse(w, id) {
                acted += 1;
            }
            continue;
        }
        let kind = npc.kind;
        let Some(t) = content.npcs.get(npc.template_id) else {
            continue;
        };
        let did = match kind {
            NpcKind::Monster => monster_tick(w, script, id, t),
            NpcKind::Guard => guard_tick(w, script, id, t),
            _ => false,
        };
        if did {
            acted += 1;
        }
    }
    acted
}

/// Count down a corpse and bring it back at its spawn point.
fn tick_corpse(w: &mut WorldState, id: u32) -> bool {
    let Some(npc) = w.npcs.get_mut(&id) else {
        return false;
    };
    npc.respawn_countdown = npc.respawn_countdown.saturating_sub(1);
    if npc.respawn_countdown > 0 {
        return false;
    }
    let (map, x, y) = (npc.map, npc.x, npc.y);
    w.respawn_npc(id);
    if let Some(npc) = w.npcs.get_mut(&id) {
        npc.move_cooldown = 0;
        npc.attack_cooldown = 0;
        let (nmap, nx, ny) = (npc.map, npc.x, npc.y);
        w.mark_dirty_near(map, x, y);
        w.mark_dirty_near(nmap, nx, ny);
    }
    tracing::debug!("[npc] [respawn] obj_id={}", id);
    true
}

fn cool_down(w: &mut WorldState, id: u32) {
    if let Some(npc) = w.npcs.get_mut(&id) {
        npc.attack_cooldown = npc.attack_cooldown.saturating_sub(1);
        npc.move_cooldown = npc.move_cooldown.saturating_sub(1);
    }
}

fn monster_tick(w: &mut WorldState, script: &dyn StatScripting, id: u32, t: &NpcTemplate) -> bool {
    cool_down(w, id);
    let target = match hated_target(w, id) {
        Some(s) => Some(s),
        None if t.aggressive => acquire(w, id, |_| true),
        None => None,
    };
    match target {
        Some(sid) => engage(w, script, id, sid, t),
        None => false,
    }
}

/// Current target if still valid, otherwise the next most hated player.
/// Players that left, died or changed map are forgotten on the way.
fn hated_target(w: &mut WorldState, id: u32) -> Option<u64> {
    loop {
        let npc = w.npcs.get(&id)?;
        let candidate = npc.target.or_else(|| {
            npc.hate
                .iter()
                .max_by_key(|(sid, v)| (**v, std::cmp::Reverse(**sid)))
                .map(|(sid, _)| *sid)
        })?;
        let valid = w.player(candidate).is_some_and(|p| !p.dead && p.map == npc.map);
        let npc = w.npcs.get_mut(&id)?;
        if valid {
            npc.target = Some(candidate);
            return Some(candidate);
        }
        npc.forget(candidate);
    }
}

/// Closest visible, living player within aggro range that passes `want`.
fn acquire(w: &mut WorldState, id: u32, want: impl Fn(&crate::world::player::Player) -> bool) -> Option<u64> {
    let npc = w.npcs.get(&id)?;
    let (map, x, y) = (npc.map, npc.x, npc.y);
    let found = w
        .nearby_players_within(map, x, y, AGGRO_RANGE, 0)
        .into_iter()
        .filter_map(|s| w.player(s).map(|p| (s, p)))
        .filter(|(_, p)| !p.dead && !p.is_invisible() && want(p))
        .min_by_key(|(s, p)| (chebyshev(x, y, p.x, p.y), *s))
        .map(|(s, _)| s)?;
    let npc = w.npcs.get_mut(&id)?;
    npc.target = Some(found);
    npc.move_cooldown = 0;
    tracing::debug!("[npc] [aggro] obj_id={} session={}", id, found);
    Some(found)
}

/// Strike when in range and rested, otherwise close the distance.
fn engage(w: &mut WorldState, script: &dyn StatScripting, id: u32, sid: u64, t: &NpcTemplate) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    let (tx, ty) = (p.x, p.y);
    let Some(npc) = w.npcs.get(&id) else {
        return false;
    };
    let range = t.attack_range.max(1);
    if chebyshev(npc.x, npc.y, tx, ty) <= range {
        if npc.attack_cooldown > 0 {
            return false;
        }
        strike(w, script, id, sid, t);
        if let Some(npc) = w.npcs.get_mut(&id) {
            npc.attack_cooldown = t.attack_ticks;
        }
        return true;
    }
    if npc.move_cooldown > 0 {
        return false;
    }
    let moved = step_toward(w, id, tx, ty);
    if let Some(npc) = w.npcs.get_mut(&id) {
        npc.move_cooldown = t.move_ticks;
    }
    moved
}

fn strike(w: &mut WorldState, script: &dyn StatScripting, id: u32, sid: u64, t: &NpcTemplate) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (target_obj, tx, ty, target_level, target_ac) = (p.object_id(), p.x, p.y, p.level, p.stats.ac);
    let Some(npc) = w.npcs.get_mut(&id) else {
        return;
    };
    let heading = heading_to(npc.x, npc.y, tx, ty);
    npc.heading = heading;
    let r = script.npc_attack(&NpcAttackCtx {
        npc_level: npc.level,
        dmg_min: t.dmg_min,
        dmg_max: t.dmg_max,
        target_level,
        target_ac,
    });
    let dmg = if r.hit { r.damage.max(0) } else { 0 };
    let (map, x, y) = (npc.map, npc.x, npc.y);
    let pkt = if t.attack_range > 1 {
        build_attack_arrow(&RangedHit {
            attacker: id,
            target: target_obj,
            dmg,
            heading,
            seq: (w.tick & 0x7fff_ffff) as i32,
            from: (x, y),
            to: (tx, ty),
        })
    } else {
        build_attack_melee(id, target_obj, dmg, heading)
    };
    w.broadcast_near(map, x, y, 0, &pkt);
    if dmg > 0 {
        combat::damage_player(w, script, sid, dmg, None);
    }
}

/// One step toward (tx, ty): the direct diagonal first, then the two
/// side-steps. Returns false when every candidate is blocked.
pub fn step_toward(w: &mut WorldState, id: u32, tx: i32, ty: i32) -> bool {
    let Some(npc) = w.npcs.get(&id) else {
        return false;
    };
    let (map, x, y) = (npc.map, npc.x, npc.y);
    let (dx, dy) = ((tx - x).signum(), (ty - y).signum());
    let (mx, my) = (x + dx, y + dy);
    let mut candidates = vec![(mx, my)];
    if dx != 0 && dy != 0 {
        candidates.push((mx, y));
        candidates.push((x, my));
    } else if dx != 0 {
        candidates.push((mx, y + 1));
        candidates.push((mx, y - 1));
    } else if dy != 0 {
        candidates.push((x + 1, my));
        candidates.push((x - 1, my));
    }

    let Some((nx, ny)) = candidates
        .into_iter()
        .filter(|&c| c != (x, y))
        .find(|&(cx, cy)| w.content.maps.is_passable(map, cx, cy))
    else {
        return false;
    };
    w.move_npc(id, nx, ny, heading_to(x, y, nx, ny));
    w.mark_dirty_near(map, x, y);
    w.mark_dirty_near(map, nx, ny);
    true
}

fn guard_tick(w: &mut WorldState, script: &dyn StatScripting, id: u32, t: &NpcTemplate) -> bool {
    cool_down(w, id);
    let Some(npc) = w.npcs.get(&id) else {
        return false;
    };
    let (map, x, y) = (npc.map, npc.x, npc.y);
    let kept = npc.target.filter(|&s| {
        w.player(s)
            .is_some_and(|p| !p.dead && p.map == map && chebyshev(x, y, p.x, p.y) <= GUARD_LEASH)
    });
    if let Some(npc) = w.npcs.get_mut(&id) {
        npc.target = kept;
    }
    let target = kept.or_else(|| acquire(w, id, |p| p.timers.pink_name > 0));
    if let Some(sid) = target {
        return engage(w, script, id, sid, t);
    }
    return_home(w, id, t)
}

fn return_home(w: &mut WorldState, id: u32, t: &NpcTemplate) -> bool {
    let Some(npc) = w.npcs.get(&id) else {
        return false;
    };
    let (sx, sy, smap) = npc.spawn;
    let (map, x, y) = (npc.map, npc.x, npc.y);
    if (x, y, map) == (sx, sy, smap) {
        return false;
    }
    if map != smap || chebyshev(x, y, sx, sy) > GUARD_LEASH {
        let heading = npc.heading;
        w.move_npc(id, sx, sy, heading);
        w.mark_dirty_near(map, x, y);
        w.mark_dirty_near(smap, sx, sy);
        tracing::debug!("[npc] [return_home] obj_id={}", id);
        return true;
    }
    if npc.move_cooldown > 0 {
        return false;
    }
    let moved = step_toward(w, id, sx, sy);
    if let Some(npc) = w.npcs.get_mut(&id) {
        npc.move_cooldown = t.move_ticks;
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::mob_db::SpawnPoint;
    use crate::database::Content;
    use crate::game::scripting::test_support::Fixed;
    use crate::world::entities::Npc;
    use crate::world::player::test_support::player;

    const NPCS: &str = r#"
npcs:
  - { id: 45001, name: goblin, gfx: 145, hp: 20, exp: 50, move_ticks: 1, attack_ticks: 2 }
  - { id: 45002, name: orc, gfx: 146, hp: 30, aggressive: true, move_ticks: 1, attack_ticks: 2 }
  - { id: 60001, name: guard, gfx: 300, hp: 500, kind: guard, move_ticks: 1, attack_ticks: 2 }
"#;

    fn world() -> WorldState {
        WorldState::new(Arc::new(Content::from_yaml("", NPCS, "", "").unwrap()))
    }

    fn spawn(w: &mut WorldState, template: i32, obj: u32, x: i32, y: i32) {
        let t = w.content.npcs.get(template).unwrap().clone();
        let sp = SpawnPoint { npc: template, map: 4, x, y, heading: 0, count: 1, respawn_secs: 1 };
        w.add_npc(Npc::spawn(obj, &t, &sp));
    }

    #[test]
    fn test_passive_monster_ignores_players() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        spawn(&mut w, 45001, 9, 32771, 32768);
        assert_eq!(tick_npcs(&mut w, &Fixed(3)), 0);
        assert_eq!(w.npcs[&9].x, 32771);
    }

    #[test]
    fn test_aggressive_monster_chases_then_attacks() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        spawn(&mut w, 45002, 9, 32772, 32768);

        tick_npcs(&mut w, &Fixed(3));
        assert_eq!(w.npcs[&9].target, Some(1));
        assert_eq!(w.npcs[&9].x, 32771);
        assert_eq!(w.content.maps.occupied_count(4, 32772, 32768), 0);
        assert!(!w.take_dirty().is_empty());

        for _ in 0..4 {
            tick_npcs(&mut w, &Fixed(3));
        }
        assert_eq!(w.npcs[&9].x, 32769);
        assert!(w.player(1).unwrap().hp < 100);
    }

    #[test]
    fn test_hate_falls_back_when_target_leaves() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, _rb) = player(2, 101, "Bob");
        b.x += 2;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        spawn(&mut w, 45001, 9, 32769, 32769);
        w.npcs.get_mut(&9).unwrap().add_hate(1, 10);
        w.npcs.get_mut(&9).unwrap().add_hate(2, 5);
        assert_eq!(w.npcs[&9].target, Some(1));

        w.remove_player(1);
        tick_npcs(&mut w, &Fixed(3));
        assert_eq!(w.npcs[&9].target, Some(2));
        assert!(!w.npcs[&9].hate.contains_key(&1));
        assert!(w.player(2).unwrap().hp < 100);
    }

    #[test]
    fn test_blocked_step_tries_side_steps() {
        let mut w = world();
        spawn(&mut w, 45001, 9, 32768, 32768);
        spawn(&mut w, 45001, 10, 32769, 32768);
        assert!(step_toward(&mut w, 9, 32775, 32768));
        let n = &w.npcs[&9];
        assert_eq!(n.x, 32769);
        assert_ne!(n.y, 32768);
    }

    #[test]
    fn test_corpse_respawns_at_spawn_point() {
        let mut w = world();
        spawn(&mut w, 45001, 9, 32768, 32768);
        w.move_npc(9, 32770, 32770, 0);
        w.kill_npc(9);
        assert!(w.npcs[&9].dead);
        let ticks = w.npcs[&9].respawn_countdown;
        assert!(ticks > 0);
        for _ in 0..ticks {
            tick_npcs(&mut w, &Fixed(0));
        }
        let n = &w.npcs[&9];
        assert!(!n.dead);
        assert_eq!((n.x, n.y, n.hp), (32768, 32768, 20));
    }

    #[test]
    fn test_guard_hunts_pink_names_only() {
        let mut w = world();
        let (mut a, _ra) = player(1, 100, "Alice");
        a.x = 32772;
        w.add_player(a).unwrap();
        spawn(&mut w, 60001, 9, 32768, 32768);

        tick_npcs(&mut w, &Fixed(3));
        assert_eq!(w.npcs[&9].target, None);

        w.player_mut(1).unwrap().timers.pink_name = 100;
        tick_npcs(&mut w, &Fixed(3));
        assert_eq!(w.npcs[&9].target, Some(1));
        assert_eq!(w.npcs[&9].x, 32769);

        w.player_mut(1).unwrap().timers.pink_name = 0;
        w.npcs.get_mut(&9).unwrap().target = None;
        tick_npcs(&mut w, &Fixed(3));
        assert_eq!(w.npcs[&9].x, 32768);
    }
}
