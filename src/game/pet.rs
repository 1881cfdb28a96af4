//! Owner-side companion control.
//!
//! Only the owner may open a companion's menu or change its mode. Pet
//! equipment rules are not modelled here; the item command is validated
//! and answered with a refreshed menu.

use super::packets::build_pet_menu;
use crate::world::entities::ControlMode;
use crate::world::WorldState;

/// The companion `obj_id` if `sid`'s character owns it.
fn owned(w: &WorldState, sid: u64, obj_id: u32) -> Option<u32> {
    let char_id = w.player(sid)?.char_id;
    w.companions.get(&obj_id).filter(|c| c.owner_char == char_id).map(|c| c.obj_id)
}

fn send_menu(w: &WorldState, sid: u64, obj_id: u32) {
    if let Some(c) = w.companions.get(&obj_id) {
        w.send_to(sid, build_pet_menu(c));
    }
}

/// Pet menu request.
pub fn open_menu(w: &WorldState, sid: u64, obj_id: u32) -> bool {
    let Some(obj_id) = owned(w, sid, obj_id) else {
        return false;
    };
    send_menu(w, sid, obj_id);
    true
}

/// Switch a companion's control mode. Dismiss releases it from the world.
pub fn set_mode(w: &mut WorldState, sid: u64, obj_id: u32, mode: ControlMode) -> bool {
    let Some(obj_id) = owned(w, sid, obj_id) else {
        return false;
    };
    if mode == ControlMode::Dismiss {
        if let Some(c) = w.remove_companion(obj_id) {
            w.mark_dirty_near(c.map, c.x, c.y);
            tracing::info!("[pet] [dismiss] session={} obj_id={}", sid, obj_id);
        }
        return true;
    }
    if let Some(c) = w.companions.get_mut(&obj_id) {
        c.mode = mode;
    }
    send_menu(w, sid, obj_id);
    tracing::debug!("[pet] [mode] session={} obj_id={} mode={:?}", sid, obj_id, mode);
    true
}

/// Route a dialog command posted against a companion. Returns false when
/// the object is not an owned companion or the command is unknown.
pub fn handle_action(w: &mut WorldState, sid: u64, obj_id: u32, action: &str) -> bool {
    match ControlMode::from_action(action) {
        Some(mode) => set_mode(w, sid, obj_id, mode),
        None => false,
    }
}

/// Pet item command: `list_no` indexes the companion's held items.
pub fn use_item(w: &WorldState, sid: u64, obj_id: u32, list_no: u8) -> bool {
    let Some(obj_id) = owned(w, sid, obj_id) else {
        return false;
    };
    let Some(held) = w.companions.get(&obj_id).and_then(|c| c.held_items.get(list_no as usize).copied()) else {
        return false;
    };
    tracing::debug!("[pet] [use_item] session={} obj_id={} item={}", sid, obj_id, held);
    send_menu(w, sid, obj_id);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::network::opcodes::S_HYPERTEXT;
    use crate::world::entities::{Companion, CompanionKind};
    use crate::world::player::test_support::player;
    use std::sync::Arc;

    fn pet(obj_id: u32, owner_char: i32) -> Companion {
        Companion {
            obj_id,
            owner_char,
            kind: CompanionKind::Pet,
            template_id: 45034,
            name: "doberman".into(),
            gfx: 938,
            level: 5,
            x: 32769,
            y: 32768,
            map: 4,
            heading: 0,
            hp: 30,
            max_hp: 30,
            mode: ControlMode::Rest,
            held_items: vec![501],
        }
    }

    fn world() -> WorldState {
        let mut w = WorldState::new(Arc::new(Content::default()));
        let (a, _ra) = player(1, 100, "Alice");
        let (b, _rb) = player(2, 101, "Bob");
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        w.add_companion(pet(900, 100));
        w
    }

    #[test]
    fn test_only_owner_controls() {
        let mut w = world();
        assert!(!set_mode(&mut w, 2, 900, ControlMode::Aggressive));
        assert_eq!(w.companions[&900].mode, ControlMode::Rest);
        assert!(handle_action(&mut w, 1, 900, "aggressive"));
        assert_eq!(w.companions[&900].mode, ControlMode::Aggressive);
        assert!(!handle_action(&mut w, 1, 900, "sit"));
    }

    #[test]
    fn test_dismiss_removes_companion() {
        let mut w = world();
        w.take_dirty();
        assert!(set_mode(&mut w, 1, 900, ControlMode::Dismiss));
        assert!(w.companions.is_empty());
        assert!(w.take_dirty().contains(&1));
    }

    #[test]
    fn test_menu_and_item_checks() {
        let (a, mut ra) = player(1, 100, "Alice");
        let mut w = WorldState::new(Arc::new(Content::default()));
        w.add_player(a).unwrap();
        w.add_companion(pet(900, 100));
        assert!(open_menu(&w, 1, 900));
        assert_eq!(ra.try_recv().unwrap()[0], S_HYPERTEXT);
        assert!(!open_menu(&w, 1, 901));
        assert!(use_item(&w, 1, 900, 0));
        assert!(!use_item(&w, 1, 900, 3));
    }
}
