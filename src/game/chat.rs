//! Chat channels and whispers.

use super::packets::{build_chat_line, build_message_code, build_say, build_shout, build_system_message, build_tell};
use crate::world::WorldState;

pub const CHAT_NORMAL: u8 = 0;
pub const CHAT_SHOUT: u8 = 2;
pub const CHAT_WORLD: u8 = 3;
pub const CHAT_CLAN: u8 = 4;
pub const CHAT_PARTY: u8 = 11;
pub const CHAT_TRADE: u8 = 12;

/// World chat needs at least this much food and eats `WORLD_CHAT_FOOD` of it.
pub const WORLD_CHAT_MIN_FOOD: i32 = 6;
pub const WORLD_CHAT_FOOD: i32 = 5;

const MSG_NO_SUCH_CHARACTER: u16 = 73;

/// Deliver one chat line. Returns false when nothing was sent.
pub fn say(w: &mut WorldState, sid: u64, kind: u8, text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let Some(p) = w.player(sid) else {
        return false;
    };
    let (obj, char_id, name, x, y) = (p.object_id(), p.char_id, p.name.clone(), p.x, p.y);
    tracing::debug!("[chat] [say] session={} kind={} len={}", sid, kind, text.len());

    match kind {
        CHAT_NORMAL => {
            w.broadcast_with_self(sid, &build_say(obj, &name, text));
        }
        CHAT_SHOUT => {
            w.broadcast_with_self(sid, &build_shout(obj, &name, text, x, y));
        }
        CHAT_WORLD => {
            let Some(p) = w.player_mut(sid) else {
                return false;
            };
            if p.food < WORLD_CHAT_MIN_FOOD {
                return false;
            }
            p.food -= WORLD_CHAT_FOOD;
            super::item::send_status(w, sid);
            w.broadcast_all(&build_chat_line(CHAT_WORLD, &format!("[{}] {}", name, text)));
        }
        CHAT_TRADE => {
            w.broadcast_all(&build_chat_line(CHAT_TRADE, &format!("[{}] {}", name, text)));
        }
        CHAT_CLAN => {
            let Some(clan) = w.clans.clan_of(char_id) else {
                return false;
            };
            let pkt = build_chat_line(CHAT_CLAN, &format!("{{{}}} {}", name, text));
            for char_id in clan.members.keys() {
                if let Some(m) = w.player_by_char(*char_id) {
                    m.session.send(pkt.clone());
                }
            }
        }
        CHAT_PARTY => {
            let Some(party) = w.parties.party_of(char_id) else {
                return false;
            };
            let pkt = build_chat_line(CHAT_PARTY, &format!("(({})) {}", name, text));
            for char_id in &party.members {
                if let Some(m) = w.player_by_char(*char_id) {
                    m.session.send(pkt.clone());
                }
            }
        }
        _ => {
            tracing::debug!("[chat] [unknown_kind] session={} kind={}", sid, kind);
            return false;
        }
    }
    true
}

/// Private message by character name.
pub fn whisper(w: &WorldState, sid: u64, target: &str, text: &str) -> bool {
    if target.is_empty() || text.is_empty() {
        return false;
    }
    let Some(p) = w.player(sid) else {
        return false;
    };
    let Some(to) = w.player_by_name(target) else {
        p.session.send(build_message_code(MSG_NO_SUCH_CHARACTER, &[]));
        return false;
    };
    to.session.send(build_tell(&p.name, text));
    p.session.send(build_system_message(&format!("-> ({}) {}", target, text)));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::network::opcodes::*;
    use crate::world::player::test_support::player;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<Bytes> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn two() -> (WorldState, UnboundedReceiver<Bytes>, UnboundedReceiver<Bytes>) {
        let mut w = WorldState::new(Arc::new(Content::default()));
        let (a, ra) = player(1, 100, "Alice");
        let (mut b, rb) = player(2, 101, "Bob");
        b.map = 5;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        (w, ra, rb)
    }

    #[test]
    fn test_normal_stays_local_world_reaches_all() {
        let (mut w, mut ra, mut rb) = two();
        assert!(say(&mut w, 1, CHAT_NORMAL, "hi"));
        assert_eq!(drain(&mut ra)[0][0], S_SAY);
        assert!(drain(&mut rb).is_empty());

        w.player_mut(1).unwrap().food = 10;
        assert!(say(&mut w, 1, CHAT_WORLD, "hello all"));
        assert_eq!(w.player(1).unwrap().food, 5);
        let got = drain(&mut rb);
        assert_eq!(got.len(), 1);
        assert_eq!((got[0][0], got[0][1]), (S_MESSAGE, CHAT_WORLD));

        assert!(!say(&mut w, 1, CHAT_WORLD, "again"));
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn test_party_chat_needs_party() {
        let (mut w, _ra, mut rb) = two();
        assert!(!say(&mut w, 1, CHAT_PARTY, "anyone?"));
        let pid = w.parties.create(100, 101);
        w.player_mut(1).unwrap().party_id = Some(pid);
        w.player_mut(2).unwrap().party_id = Some(pid);
        assert!(say(&mut w, 1, CHAT_PARTY, "go"));
        let got = drain(&mut rb);
        assert_eq!((got[0][0], got[0][1]), (S_MESSAGE, CHAT_PARTY));
    }

    #[test]
    fn test_whisper() {
        let (w, mut ra, mut rb) = two();
        assert!(whisper(&w, 1, "bob", "psst"));
        assert_eq!(drain(&mut rb)[0][0], S_TELL);
        assert_eq!(drain(&mut ra)[0][0], S_MESSAGE);

        assert!(!whisper(&w, 1, "Carol", "hello?"));
        let got = drain(&mut ra);
        assert_eq!(got[0][0], S_MESSAGE_CODE);
        assert_eq!(u16::from_le_bytes([got[0][1], got[0][2]]), MSG_NO_SUCH_CHARACTER);
    }
}
