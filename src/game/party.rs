//! Party invitations, membership changes and the party window.

use super::ask_yes_no;
use super::packets::*;
use crate::game::types::chebyshev;
use crate::network::opcodes::{YN_CHAT_PARTY, YN_PARTY};
use crate::world::party::{Party, PartyExit};
use crate::world::WorldState;

/// Invite range in tiles.
pub const INVITE_RANGE: i32 = 7;

const MSG_IN_OTHER_PARTY: u16 = 415;
const MSG_NOT_LEADER_INVITE: u16 = 416;
const MSG_PARTY_FULL: u16 = 417;
const MSG_DISSOLVED: u16 = 418;
const MSG_KICKED: u16 = 419;
const MSG_LEFT: u16 = 420;
const MSG_DECLINED: u16 = 423;
const MSG_JOINED: u16 = 424;
const MSG_NO_PARTY: u16 = 425;
const MSG_NOT_MEMBER: u16 = 426;
const MSG_NOT_LEADER_KICK: u16 = 427;
const MSG_OUT_OF_SIGHT: u16 = 952;

fn msg(w: &WorldState, sid: u64, code: u16, args: &[&str]) {
    w.send_to(sid, build_message_code(code, args));
}

fn in_range(w: &WorldState, a: u64, b: u64, range: i32) -> bool {
    match (w.player(a), w.player(b)) {
        (Some(pa), Some(pb)) => pa.map == pb.map && chebyshev(pa.x, pa.y, pb.x, pb.y) <= range,
        _ => false,
    }
}

/// Send a party invite (`kind` 0 normal, 1 auto-share).
pub fn invite(w: &mut WorldState, sid: u64, target_char: i32, kind: u8) {
    let Some(me) = w.player(sid) else {
        return;
    };
    let (my_char, my_name) = (me.char_id, me.name.clone());
    let Some(target) = w.session_of_char(target_char) else {
        return;
    };
    if target == sid {
        return;
    }
    if !in_range(w, sid, target, INVITE_RANGE) {
        msg(w, sid, MSG_OUT_OF_SIGHT, &[]);
        return;
    }
    if w.parties.party_of(target_char).is_some() {
        msg(w, sid, MSG_IN_OTHER_PARTY, &[]);
        return;
    }
    if let Some(party) = w.parties.party_of(my_char) {
        if party.leader != my_char {
            msg(w, sid, MSG_NOT_LEADER_INVITE, &[]);
            return;
        }
        if party.is_full() {
            msg(w, sid, MSG_PARTY_FULL, &[]);
            return;
        }
    }
    let kind = if kind == 0 { YN_PARTY } else { YN_CHAT_PARTY };
    ask_yes_no(w, target, kind, my_char, &[&my_name]);
}

/// Answer to a party invite raised by `inviter_char`.
pub fn answer_invite(w: &mut WorldState, sid: u64, inviter_char: i32, accepted: bool) {
    let Some(me) = w.player(sid) else {
        return;
    };
    let (my_char, my_name) = (me.char_id, me.name.clone());
    let Some(inviter) = w.session_of_char(inviter_char) else {
        return;
    };
    if !accepted {
        msg(w, inviter, MSG_DECLINED, &[&my_name]);
        return;
    }
    if w.parties.party_of(my_char).is_some() {
        return;
    }
    let party_id = match w.parties.party_of(inviter_char) {
        Some(p) if p.is_full() => {
            msg(w, inviter, MSG_PARTY_FULL, &[]);
            return;
        }
        Some(p) if p.leader != inviter_char => return,
        Some(p) => {
            let id = p.id;
            if !w.parties.add(id, my_char) {
                return;
            }
            id
        }
        None => {
            let id = w.parties.create(inviter_char, my_char);
            if let Some(p) = w.player_mut(inviter) {
                p.party_id = Some(id);
            }
            id
        }
    };
    if let Some(p) = w.player_mut(sid) {
        p.party_id = Some(party_id);
    }
    notify_joined(w, party_id, my_char);
    msg(w, inviter, MSG_JOINED, &[&my_name]);
    tracing::info!("[party] [joined] party={} char_id={} inviter={}", party_id, my_char, inviter_char);
}

fn rows(w: &WorldState, party: &Party) -> Vec<(i32, String, u8, i32, i32, i32)> {
    let mut ids = vec![party.leader];
    ids.extend(party.members.iter().copied().filter(|&m| m != party.leader));
    ids.into_iter()
        .filter_map(|id| w.player_by_char(id))
        .map(|p| (p.char_id, p.name.clone(), p.hp_ratio(), p.map, p.x, p.y))
        .collect()
}

fn as_party_rows(rows: &[(i32, String, u8, i32, i32, i32)]) -> Vec<PartyRow<'_>> {
    rows.iter()
        .map(|(char_id, name, hp, map, x, y)| PartyRow { char_id: *char_id, name, hp_ratio: *hp, map: *map, x: *x, y: *y })
        .collect()
}

fn notify_joined(w: &WorldState, party_id: u32, newcomer: i32) {
    let Some(party) = w.parties.get(party_id) else {
        return;
    };
    let owned = rows(w, party);
    let view = as_party_rows(&owned);
    if let Some(s) = w.session_of_char(newcomer) {
        w.send_to(s, build_party_list(&view));
    }
    if let Some(new_row) = view.iter().find(|r| r.char_id == newcomer) {
        let pkt = build_party_new_member(new_row);
        for m in party.members.iter().filter(|&&m| m != newcomer) {
            if let Some(s) = w.session_of_char(*m) {
                w.send_to(s, pkt.clone());
            }
        }
    }
    send_refresh(w, party_id);
    for a in &party.members {
        let Some(sa) = w.session_of_char(*a) else {
            continue;
        };
        for b in party.members.iter().filter(|&&b| b != *a) {
            if let Some(pb) = w.player_by_char(*b) {
                w.send_to(sa, build_hp_meter(pb.object_id(), pb.hp_ratio()));
            }
        }
    }
}

/// Position refresh for the whole party window.
pub fn send_refresh(w: &WorldState, party_id: u32) {
    let Some(party) = w.parties.get(party_id) else {
        return;
    };
    let owned = rows(w, party);
    let pkt = build_party_refresh(&as_party_rows(&owned));
    for m in &party.members {
        if let Some(s) = w.session_of_char(*m) {
            w.send_to(s, pkt.clone());
        }
    }
}

/// Show a player's HP to the rest of its party.
pub fn broadcast_hp(w: &WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(party) = p.party_id.and_then(|id| w.parties.get(id)) else {
        return;
    };
    let pkt = build_hp_meter(p.object_id(), p.hp_ratio());
    for m in party.members.iter().filter(|&&m| m != p.char_id) {
        if let Some(s) = w.session_of_char(*m) {
            w.send_to(s, pkt.clone());
        }
    }
}

fn clear_meters(w: &WorldState, leaver: i32, others: &[i32]) {
    let Some(ls) = w.session_of_char(leaver) else {
        return;
    };
    for o in others.iter().filter(|&&o| o != leaver) {
        if let Some(os) = w.session_of_char(*o) {
            w.send_to(os, build_hp_meter(leaver as u32, 0xff));
            w.send_to(ls, build_hp_meter(*o as u32, 0xff));
        }
    }
    w.send_to(ls, build_hp_meter(leaver as u32, 0xff));
}

fn apply_exit(w: &mut WorldState, char_id: i32, name: &str, exit: PartyExit, kicked: bool) {
    match exit {
        PartyExit::NotMember => {}
        PartyExit::Dissolved(members) => {
            for m in &members {
                clear_meters(w, *m, &members);
                if let Some(p) = w.player_by_char_mut(*m) {
                    p.party_id = None;
                }
                if let Some(s) = w.session_of_char(*m) {
                    msg(w, s, MSG_DISSOLVED, &[]);
                }
            }
            tracing::info!("[party] [dissolved] by={} members={}", char_id, members.len());
        }
        PartyExit::Left(remaining) => {
            let mut all = remaining.members.clone();
            all.push(char_id);
            clear_meters(w, char_id, &all);
            if let Some(p) = w.player_by_char_mut(char_id) {
                p.party_id = None;
            }
            for m in &remaining.members {
                if let Some(s) = w.session_of_char(*m) {
                    msg(w, s, MSG_LEFT, &[name]);
                }
            }
            if let Some(s) = w.session_of_char(char_id) {
                if kicked {
                    msg(w, s, MSG_KICKED, &[]);
                } else {
                    msg(w, s, MSG_LEFT, &[name]);
                }
            }
            send_refresh(w, remaining.id);
        }
    }
}

pub fn leave(w: &mut WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let (char_id, name) = (p.char_id, p.name.clone());
    let exit = w.parties.leave(char_id);
    apply_exit(w, char_id, &name, exit, false);
}

/// Leader removes a member by name.
pub fn banish(w: &mut WorldState, sid: u64, name: &str) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let my_char = p.char_id;
    let Some(party) = w.parties.party_of(my_char) else {
        return;
    };
    if party.leader != my_char {
        msg(w, sid, MSG_NOT_LEADER_KICK, &[]);
        return;
    }
    let target = party
        .members
        .iter()
        .filter_map(|m| w.player_by_char(*m))
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .map(|m| (m.char_id, m.name.clone()));
    let Some((target_char, target_name)) = target else {
        msg(w, sid, MSG_NOT_MEMBER, &[name]);
        return;
    };
    if target_char == my_char {
        return;
    }
    let exit = w.parties.kick(target_char);
    apply_exit(w, target_char, &target_name, exit, true);
}

pub fn transfer_leader(w: &mut WorldState, sid: u64, target_char: i32) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let my_char = p.char_id;
    let Some(party) = w.parties.party_of(my_char) else {
        msg(w, sid, 1697, &[]);
        return;
    };
    if party.leader != my_char {
        msg(w, sid, 1697, &[]);
        return;
    }
    if target_char == my_char {
        return;
    }
    if !party.contains(target_char) {
        msg(w, sid, 1696, &[]);
        return;
    }
    let Some(target) = w.session_of_char(target_char) else {
        return;
    };
    if !in_range(w, sid, target, INVITE_RANGE) {
        msg(w, sid, 1695, &[]);
        return;
    }
    let id = party.id;
    w.parties.set_leader(id, target_char);
    if let Some(party) = w.parties.get(id) {
        let pkt = build_party_set_master(target_char);
        for m in &party.members {
            if let Some(s) = w.session_of_char(*m) {
                w.send_to(s, pkt.clone());
            }
        }
    }
    tracing::info!("[party] [leader_changed] party={} from={} to={}", id, my_char, target_char);
}

/// The party window: leader name plus a member list.
pub fn who(w: &WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(party) = w.parties.party_of(p.char_id) else {
        msg(w, sid, MSG_NO_PARTY, &[]);
        return;
    };
    let leader = w.player_by_char(party.leader).map(|l| l.name.clone()).unwrap_or_default();
    let names: Vec<String> = party
        .members
        .iter()
        .filter(|&&m| m != party.leader)
        .filter_map(|m| w.player_by_char(*m))
        .map(|m| m.name.clone())
        .collect();
    w.send_to(sid, build_party_who(p.object_id(), &leader, &names.join(" ")));
}
