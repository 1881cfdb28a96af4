//! Area-of-interest sync.
//!
//! Every viewer's [`KnownSet`] is the record of what its client currently
//! draws. Changes are always computed as a diff between that set and
//! [`WorldState::visible_to`], so an object is put exactly once and removed
//! exactly once no matter how many mutations touched it.
//!
//! [`KnownSet`]: crate::world::known::KnownSet

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

use super::packets::*;
use crate::game::types::chebyshev;
use crate::network::opcodes::TELEPORT_UNLOCK;
use crate::world::known::{KnownKind, ViewChange};
use crate::world::WorldState;

/// Full appearance packet of an object as `viewer` should see it.
pub fn put_packet(w: &WorldState, viewer: u64, obj_id: u32, kind: KnownKind) -> Option<Bytes> {
    match kind {
        KnownKind::Player => {
            let target = w.player_by_char(obj_id as i32)?;
            let viewer_char = w.player(viewer).map(|p| p.char_id).unwrap_or(0);
            let same_party = target
                .party_id
                .is_some_and(|pid| w.parties.get(pid).is_some_and(|party| party.contains(viewer_char)));
            let hp = if same_party { target.hp_ratio() } else { 0xff };
            Some(build_other_char_pack(target, hp))
        }
        KnownKind::Npc => w.npcs.get(&obj_id).map(build_npc_pack),
        KnownKind::Ground => w.ground.get(&obj_id).map(|g| build_ground_pack(g, &w.content)),
        KnownKind::Door => w.doors.get(&obj_id).map(build_door_pack),
        KnownKind::Companion => {
            let c = w.companions.get(&obj_id)?;
            let viewer_char = w.player(viewer).map(|p| p.char_id).unwrap_or(0);
            let master = w.player_by_char(c.owner_char).map(|p| p.name.as_str()).unwrap_or("");
            Some(build_companion_pack(c, viewer_char == c.owner_char, master))
        }
    }
}

fn heading_of(w: &WorldState, obj_id: u32, kind: KnownKind) -> u8 {
    match kind {
        KnownKind::Player => w.player_by_char(obj_id as i32).map(|p| p.heading),
        KnownKind::Npc => w.npcs.get(&obj_id).map(|n| n.heading),
        KnownKind::Companion => w.companions.get(&obj_id).map(|c| c.heading),
        KnownKind::Ground | KnownKind::Door => None,
    }
    .unwrap_or(0)
}

/// Re-sync one viewer against the world. Returns the number of packets sent.
pub fn refresh_view(w: &mut WorldState, sid: u64) -> usize {
    let visible = w.visible_to(sid);
    let Some(p) = w.player_mut(sid) else {
        return 0;
    };
    let before: HashMap<u32, (i32, i32)> = p
        .known
        .ids()
        .filter_map(|id| p.known.get(id).map(|e| (id, (e.x, e.y))))
        .collect();
    let changes = p.known.refresh(&visible);
    if changes.is_empty() {
        return 0;
    }
    let kinds: HashMap<u32, (KnownKind, i32, i32)> = visible.iter().map(|&(id, k, x, y)| (id, (k, x, y))).collect();

    let mut out = Vec::with_capacity(changes.len());
    for change in changes {
        match change {
            ViewChange::Appear(id) => {
                if let Some(pkt) = kinds.get(&id).and_then(|&(k, ..)| put_packet(w, sid, id, k)) {
                    out.push(pkt);
                }
            }
            ViewChange::Vanish(id) => out.push(build_remove_object(id)),
            ViewChange::Moved(id) => {
                let Some(&(kind, x, y)) = kinds.get(&id) else {
                    continue;
                };
                let (px, py) = before.get(&id).copied().unwrap_or((x, y));
                if chebyshev(px, py, x, y) > 1 {
                    out.push(build_remove_object(id));
                    if let Some(pkt) = put_packet(w, sid, id, kind) {
                        out.push(pkt);
                    }
                } else {
                    out.push(build_move_object(id, px, py, heading_of(w, id, kind)));
                }
            }
        }
    }
    let n = out.len();
    if let Some(p) = w.player(sid) {
        for pkt in out {
            p.session.send(pkt);
        }
    }
    n
}

/// Forget everything and rebuild the view from scratch.
pub fn on_scene_change(w: &mut WorldState, sid: u64) {
    if let Some(p) = w.player_mut(sid) {
        p.known.clear();
    }
    refresh_view(w, sid);
}

/// Re-sync every player who can see any of the given positions.
pub fn refresh_observers(w: &mut WorldState, spots: &[(i32, i32, i32)], exclude: u64) {
    let mut viewers = BTreeSet::new();
    for &(map, x, y) in spots {
        viewers.extend(w.nearby_players(map, x, y, exclude));
    }
    for s in viewers {
        refresh_view(w, s);
    }
}

/// A player stepped from (px, py); sync the player and everyone around
/// either end of the step.
pub fn after_player_move(w: &mut WorldState, sid: u64, px: i32, py: i32) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (map, x, y) = (p.map, p.x, p.y);
    refresh_observers(w, &[(map, px, py), (map, x, y)], sid);
    refresh_view(w, sid);
}

/// Move a player anywhere and rebuild both sides of the view.
///
/// Old viewers drop the player, the client switches map, the Known set is
/// emptied and the new surroundings are sent fresh. Owned companions come
/// along to the destination tile.
pub fn teleport_player(w: &mut WorldState, sid: u64, x: i32, y: i32, map: i32, heading: u8) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    let (obj, old_map, ox, oy, char_id) = (p.object_id(), p.map, p.x, p.y, p.char_id);

    let remove = build_remove_object(obj);
    for s in w.nearby_players(old_map, ox, oy, sid) {
        if let Some(viewer) = w.player_mut(s) {
            if viewer.known.remove(obj).is_some() {
                viewer.session.send(remove.clone());
            }
        }
    }

    w.update_position(sid, x, y, map, heading);
    for c in w.companions_of(char_id) {
        w.move_companion(c, x, y, map, heading);
    }

    let underwater = w.content.maps.is_underwater(map);
    if let Some(p) = w.player_mut(sid) {
        p.known.clear();
        p.session.send(build_map_id(map, underwater));
        let own = build_own_char_pack(p);
        p.session.send(own);
    }

    refresh_observers(w, &[(old_map, ox, oy), (map, x, y)], sid);
    refresh_view(w, sid);
    if map != old_map {
        super::timed_map::on_enter_map(w, sid);
    }
    w.send_to(sid, build_paralysis(TELEPORT_UNLOCK));
    tracing::debug!("[view] [teleport] session={} map={} x={} y={}", sid, map, x, y);
    true
}

/// Flush every view queued by tick-time mutations.
pub fn flush_dirty(w: &mut WorldState) -> usize {
    let dirty = w.take_dirty();
    let n = dirty.len();
    for s in dirty {
        refresh_view(w, s);
    }
    n
}
