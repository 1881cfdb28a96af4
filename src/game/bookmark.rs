//! Saved locations used by the bookmark teleport spell.

use super::packets::{build_add_bookmark, build_message_code};
use crate::world::player::Bookmark;
use crate::world::WorldState;

pub const MAX_BOOKMARKS: usize = 50;

const MSG_BOOKMARKS_FULL: u16 = 82;
const MSG_CANNOT_MARK: u16 = 214;

/// Remember the player's current position under `name`. Duplicate names
/// are ignored.
pub fn add(w: &mut WorldState, sid: u64, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let markable = w.player(sid).is_some_and(|p| w.content.maps.is_markable(p.map));
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if p.bookmarks.len() >= MAX_BOOKMARKS {
        p.session.send(build_message_code(MSG_BOOKMARKS_FULL, &[]));
        return false;
    }
    if !markable {
        p.session.send(build_message_code(MSG_CANNOT_MARK, &[]));
        return false;
    }
    if p.bookmarks.iter().any(|b| b.name == name) {
        return false;
    }
    let id = p.bookmarks.iter().map(|b| b.id).max().unwrap_or(0) + 1;
    let mark = Bookmark { id, name: name.to_string(), x: p.x, y: p.y, map: p.map };
    p.session.send(build_add_bookmark(&mark));
    tracing::info!("[bookmark] [add] session={} name={} map={} x={} y={}", sid, name, mark.map, mark.x, mark.y);
    p.bookmarks.push(mark);
    true
}

pub fn delete(w: &mut WorldState, sid: u64, name: &str) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    let Some(idx) = p.bookmarks.iter().position(|b| b.name == name) else {
        return false;
    };
    p.bookmarks.remove(idx);
    tracing::debug!("[bookmark] [delete] session={} name={}", sid, name);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::network::opcodes::{S_ADD_BOOKMARK, S_MESSAGE_CODE};
    use crate::world::player::test_support::player;
    use std::sync::Arc;

    const MAPS: &str = r#"
maps:
  - { id: 4, start_x: 32000, end_x: 34000, start_y: 32000, end_y: 34000 }
  - { id: 99, start_x: 0, end_x: 100, start_y: 0, end_y: 100, markable: false }
"#;

    fn world() -> (WorldState, tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>) {
        let mut w = WorldState::new(Arc::new(Content::from_yaml("", "", "", MAPS).unwrap()));
        let (a, ra) = player(1, 100, "Alice");
        w.add_player(a).unwrap();
        (w, ra)
    }

    #[test]
    fn test_add_assigns_next_id_and_ignores_duplicates() {
        let (mut w, mut ra) = world();
        assert!(add(&mut w, 1, "home"));
        assert!(add(&mut w, 1, "town"));
        assert!(!add(&mut w, 1, "home"));
        let ids: Vec<i32> = w.player(1).unwrap().bookmarks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(ra.try_recv().unwrap()[0], S_ADD_BOOKMARK);

        assert!(delete(&mut w, 1, "home"));
        assert!(!delete(&mut w, 1, "home"));
        assert!(add(&mut w, 1, "home"));
        assert_eq!(w.player(1).unwrap().bookmarks.last().unwrap().id, 3);
    }

    #[test]
    fn test_limit_and_unmarkable_map() {
        let (mut w, mut ra) = world();
        for i in 0..MAX_BOOKMARKS {
            assert!(add(&mut w, 1, &format!("m{}", i)));
        }
        while ra.try_recv().is_ok() {}
        assert!(!add(&mut w, 1, "one more"));
        let pkt = ra.try_recv().unwrap();
        assert_eq!(pkt[0], S_MESSAGE_CODE);
        assert_eq!(u16::from_le_bytes([pkt[1], pkt[2]]), MSG_BOOKMARKS_FULL);

        w.player_mut(1).unwrap().bookmarks.clear();
        w.update_position(1, 50, 50, 99, 0);
        assert!(!add(&mut w, 1, "nowhere"));
        assert!(w.player(1).unwrap().bookmarks.is_empty());
    }
}
