//! Walking, facing and every way a player is moved somewhere else.
//!
//! The client's own coordinates are never trusted; a step is always taken
//! from the server position. Teleports go through one pending destination
//! so a teleport blocked by paralysis can be completed by the client's
//! later confirmation.

use super::packets::{build_action, build_change_heading, build_door_pack, build_message_code};
use super::types::{chebyshev, HEADING_DX, HEADING_DY};
use super::{item, trade, view};
use crate::world::player::TeleportTarget;
use crate::world::WorldState;

/// The client XORs the heading byte of a move with this.
pub const MOVE_HEADING_KEY: u8 = 0x49;
/// How far from a portal tile a player may be when entering it.
pub const PORTAL_RANGE: i32 = 3;
/// Doors answer a click from this far away.
pub const DOOR_RANGE: i32 = 3;

const MSG_NO_GOLD: u16 = 189;

/// One step in `heading` from the current position. Refused while the
/// player is dead, paralysed or asleep.
pub fn step(w: &mut WorldState, sid: u64, heading: u8) -> bool {
    if heading > 7 {
        return false;
    }
    let Some(p) = w.player(sid) else {
        return false;
    };
    if p.dead || p.is_immobile() {
        tracing::trace!("[move] [refused] session={} immobile={}", sid, p.is_immobile());
        return false;
    }
    let (px, py, map) = (p.x, p.y, p.map);
    let (x, y) = (px + HEADING_DX[heading as usize], py + HEADING_DY[heading as usize]);
    w.update_position(sid, x, y, map, heading);
    trade::cancel_if_apart(w, sid);
    view::after_player_move(w, sid, px, py);
    true
}

/// Turn in place and show the new facing to everyone around.
pub fn change_direction(w: &mut WorldState, sid: u64, heading: u8) -> bool {
    if heading > 7 {
        return false;
    }
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if p.dead {
        return false;
    }
    p.heading = heading;
    let (obj, map, x, y) = (p.object_id(), p.map, p.x, p.y);
    w.broadcast_near(map, x, y, sid, &build_change_heading(obj, heading));
    true
}

/// Step onto the portal at (x, y) on the player's map.
pub fn enter_portal(w: &mut WorldState, sid: u64, x: i32, y: i32) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    if p.dead {
        return false;
    }
    let Some(portal) = w.content.maps.portal(p.map, x, y) else {
        tracing::debug!("[move] [no_portal] session={} map={} x={} y={}", sid, p.map, x, y);
        return false;
    };
    if chebyshev(p.x, p.y, x, y) > PORTAL_RANGE {
        return false;
    }
    let target = TeleportTarget {
        x: portal.dst_x,
        y: portal.dst_y,
        map: portal.dst_map,
        heading: portal.heading,
    };
    tracing::info!(
        "[move] [portal] session={} name={} dst_map={} dst_x={} dst_y={}",
        sid,
        p.name,
        target.map,
        target.x,
        target.y
    );
    queue_teleport(w, sid, target)
}

/// Store `target` as the player's pending destination and try to go there.
pub fn queue_teleport(w: &mut WorldState, sid: u64, target: TeleportTarget) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    p.pending_teleport = Some(target);
    confirm_teleport(w, sid)
}

/// Carry out the pending teleport. It stays pending while the player
/// cannot move.
pub fn confirm_teleport(w: &mut WorldState, sid: u64) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if p.dead || p.is_immobile() {
        return false;
    }
    let Some(t) = p.pending_teleport.take() else {
        return false;
    };
    trade::cancel(w, sid);
    view::teleport_player(w, sid, t.x, t.y, t.map, t.heading)
}

/// A teleporter NPC's paid destination behind `action`.
pub fn npc_teleport(w: &mut WorldState, sid: u64, npc_template: i32, action: &str) -> bool {
    let Some(dest) = w.content.maps.teleport(npc_template, action).cloned() else {
        return false;
    };
    if dest.price > 0 {
        let short = w.player(sid).is_some_and(|p| p.inventory.gold() < dest.price);
        if short || !item::spend_gold(w, sid, dest.price) {
            w.send_to(sid, build_message_code(MSG_NO_GOLD, &[]));
            return false;
        }
    }
    tracing::info!(
        "[move] [npc_teleport] session={} action={} map={} x={} y={} price={}",
        sid,
        action,
        dest.map,
        dest.x,
        dest.y,
        dest.price
    );
    let target = TeleportTarget { x: dest.x, y: dest.y, map: dest.map, heading: dest.heading };
    queue_teleport(w, sid, target);
    true
}

/// Open a closed door or close an open one. The door tile blocks walking
/// only while closed.
pub fn toggle_door(w: &mut WorldState, sid: u64, door_obj: u32) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    let Some(d) = w.doors.get(&door_obj) else {
        return false;
    };
    if p.dead || d.map != p.map || chebyshev(p.x, p.y, d.x, d.y) > DOOR_RANGE {
        return false;
    }
    let open = !d.open;
    w.set_door_open(door_obj, open);
    let Some(d) = w.doors.get(&door_obj) else {
        return false;
    };
    let (map, x, y, status) = (d.map, d.x, d.y, d.status());
    let pack = build_door_pack(d);
    let action = build_action(door_obj, status);
    for viewer in w.nearby_players(map, x, y, 0) {
        w.send_to(viewer, pack.clone());
        w.send_to(viewer, action.clone());
    }
    tracing::debug!("[move] [door] session={} door={} open={}", sid, door_obj, open);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::game::item::give_gold;
    use crate::network::opcodes::*;
    use crate::world::player::test_support::player;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const MAPS: &str = r#"
maps:
  - { id: 4, start_x: 32000, end_x: 34000, start_y: 32000, end_y: 34000 }
  - { id: 70, start_x: 0, end_x: 100, start_y: 0, end_y: 100 }
portals:
  - { map: 4, x: 32770, y: 32768, dst_x: 50, dst_y: 50, dst_map: 70, heading: 2 }
teleports:
  - { npc_id: 50020, action: "teleport giran", x: 33442, y: 32797, map: 4, heading: 5, price: 100 }
"#;

    fn world() -> WorldState {
        WorldState::new(Arc::new(Content::from_yaml("", "", "", MAPS).unwrap()))
    }

    fn opcodes(rx: &mut UnboundedReceiver<Bytes>) -> Vec<u8> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|p| p[0]).collect()
    }

    #[test]
    fn test_step_uses_server_position() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        assert!(step(&mut w, 1, 2));
        let p = w.player(1).unwrap();
        assert_eq!((p.x, p.y, p.heading), (32769, 32768, 2));
        assert!(!step(&mut w, 1, 8));
        assert!(!w.content.maps.is_passable(4, 32769, 32768));
        assert!(w.content.maps.is_passable(4, 32768, 32768));
    }

    #[test]
    fn test_paralysis_blocks_steps_until_expiry() {
        let mut w = world();
        let (mut a, _ra) = player(1, 100, "Alice");
        a.timers.paralysis = 3;
        w.add_player(a).unwrap();
        assert!(!step(&mut w, 1, 0));
        assert_eq!(w.player(1).unwrap().y, 32768);
        w.player_mut(1).unwrap().timers.paralysis = 0;
        assert!(step(&mut w, 1, 0));
        assert_eq!(w.player(1).unwrap().y, 32767);
    }

    #[test]
    fn test_observer_sees_the_step() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (mut b, mut rb) = player(2, 101, "Bob");
        b.x += 2;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        view::refresh_view(&mut w, 2);
        opcodes(&mut rb);
        step(&mut w, 1, 4);
        assert_eq!(opcodes(&mut rb), vec![S_MOVE_OBJECT]);
    }

    #[test]
    fn test_direction_broadcast() {
        let mut w = world();
        let (a, _ra) = player(1, 100, "Alice");
        let (b, mut rb) = player(2, 101, "Bob");
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        assert!(change_direction(&mut w, 1, 6));
        assert_eq!(w.player(1).unwrap().heading, 6);
        assert_eq!(opcodes(&mut rb), vec![S_CHANGE_HEADING]);
    }

    #[test]
    fn test_portal_range_and_destination() {
        let mut w = world();
        let (mut a, _ra) = player(1, 100, "Alice");
        a.x = 32760;
        w.add_player(a).unwrap();
        assert!(!enter_portal(&mut w, 1, 32770, 32768));
        assert!(!enter_portal(&mut w, 1, 32761, 32768));
        w.update_position(1, 32768, 32768, 4, 0);
        assert!(enter_portal(&mut w, 1, 32770, 32768));
        let p = w.player(1).unwrap();
        assert_eq!((p.x, p.y, p.map, p.heading), (50, 50, 70, 2));
    }

    #[test]
    fn test_teleport_waits_for_mobility() {
        let mut w = world();
        let (mut a, _ra) = player(1, 100, "Alice");
        a.timers.sleep = 5;
        w.add_player(a).unwrap();
        let t = TeleportTarget { x: 10, y: 10, map: 70, heading: 0 };
        assert!(!queue_teleport(&mut w, 1, t));
        assert_eq!(w.player(1).unwrap().pending_teleport, Some(t));
        w.player_mut(1).unwrap().timers.sleep = 0;
        assert!(confirm_teleport(&mut w, 1));
        assert_eq!(w.player(1).unwrap().map, 70);
        assert!(!confirm_teleport(&mut w, 1));
    }

    #[test]
    fn test_npc_teleport_charges_price() {
        let mut w = world();
        let (a, mut ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        give_gold(&mut w, 1, 50);
        opcodes(&mut ra);
        assert!(!npc_teleport(&mut w, 1, 50020, "teleport giran"));
        let pkt = ra.try_recv().unwrap();
        assert_eq!(pkt[0], S_MESSAGE_CODE);
        assert_eq!(u16::from_le_bytes([pkt[1], pkt[2]]), MSG_NO_GOLD);

        give_gold(&mut w, 1, 100);
        assert!(npc_teleport(&mut w, 1, 50020, "Teleport Giran"));
        let p = w.player(1).unwrap();
        assert_eq!((p.x, p.y), (33442, 32797));
        assert_eq!(p.inventory.gold(), 50);
        assert!(!npc_teleport(&mut w, 1, 50020, "teleport nowhere"));
    }

    #[test]
    fn test_door_toggles_passability() {
        let mut w = world();
        let (a, mut ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        w.add_door(crate::world::entities::Door { obj_id: 9, gfx: 1487, x: 32770, y: 32768, map: 4, open: false });
        assert!(!w.content.maps.is_passable(4, 32770, 32768));
        opcodes(&mut ra);
        assert!(toggle_door(&mut w, 1, 9));
        assert!(w.content.maps.is_passable(4, 32770, 32768));
        assert_eq!(opcodes(&mut ra), vec![S_PUT_OBJECT, S_ACTION]);
        assert!(toggle_door(&mut w, 1, 9));
        assert!(!w.doors[&9].open);
        w.update_position(1, 32700, 32768, 4, 0);
        assert!(!toggle_door(&mut w, 1, 9));
    }
}
