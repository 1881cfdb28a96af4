//! Clan membership.
//!
//! Every change is written to storage first and only then applied to the
//! registry and the online players. The world lock is never held while a
//! storage call is in flight, so each operation checks its preconditions,
//! drops the lock, writes, and re-reads the world before applying.

use std::path::PathBuf;

use chrono::Datelike;

use super::item::{give_gold, send_weight, spend_gold};
use super::packets::*;
use super::{ask_yes_no, GameCtx};
use crate::game::types::chebyshev;
use crate::network::opcodes::{EV_PLEDGE_MEMBERS, EV_PLEDGE_ONLINE, YN_CLAN_JOIN};
use crate::network::packet::{decode_big5, truncate_big5};
use crate::persist::{with_deadline, ClanMemberRow, StorageError, DB_DEADLINE};
use crate::world::clan::*;
use crate::world::player::HeldGold;
use crate::world::WorldState;

/// Crown class id.
const CROWN: i32 = 0;
/// A prince or guardian must stand this close to take an applicant.
pub const JOIN_RANGE: i32 = 3;

pub const MSG_CREATED: u16 = 84;
pub const MSG_NOT_CROWN: u16 = 85;
pub const MSG_ALREADY_IN_CLAN: u16 = 86;
pub const MSG_APPLICANT_IN_CLAN: u16 = 89;
pub const MSG_NO_LEADER_NEAR: u16 = 90;
pub const MSG_JOIN_ACCEPTED: u16 = 94;
pub const MSG_JOINED: u16 = 95;
pub const MSG_NAME_TAKEN: u16 = 99;
pub const MSG_NOT_MEMBER: u16 = 109;
pub const MSG_LEFT: u16 = 178;
pub const MSG_NO_GOLD: u16 = 189;
pub const MSG_BANNED: u16 = 238;
pub const MSG_BAN_DONE: u16 = 240;
pub const MSG_DISSOLVED: u16 = 269;
pub const MSG_NO_RIGHTS: u16 = 518;
pub const MSG_HAS_ESTATE: u16 = 665;
pub const MSG_NOT_IN_CLAN: u16 = 1064;

fn today() -> i32 {
    let d = chrono::Local::now().date_naive();
    d.year() * 10000 + d.month() as i32 * 100 + d.day() as i32
}

fn msg(w: &WorldState, sid: u64, code: u16, args: &[&str]) {
    w.send_to(sid, build_message_code(code, args));
}

/// Send the clan banner change to the player and everyone around them.
fn announce_banner(w: &WorldState, sid: u64, joining: bool) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let pkt = build_clan_name(p.object_id(), &p.clan_name, p.clan_id, joining);
    p.session.send(pkt.clone());
    p.session.send(build_clan_attention());
    w.broadcast_near(p.map, p.x, p.y, sid, &pkt);
}

fn clear_membership(w: &mut WorldState, char_id: i32) -> Option<u64> {
    let sid = w.session_of_char(char_id)?;
    let p = w.player_mut(sid)?;
    p.clan_id = 0;
    p.clan_name.clear();
    p.clan_rank = 0;
    Some(sid)
}

/// Found a new clan with `sid` as its prince.
pub async fn create(ctx: &GameCtx, sid: u64, name: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }
    let cost = ctx.config.clan_create_cost;
    let (char_id, char_name) = {
        let mut w = ctx.world.write().await;
        let Some(founder) = hold_charter_fee(&mut w, sid, name, cost) else {
            return;
        };
        founder
    };

    let found = today();
    let created = with_deadline(DB_DEADLINE, ctx.storage.create_clan(char_id, &char_name, name, found)).await;

    let mut w = ctx.world.write().await;
    let clan_id = match created {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("[clan] [create_failed] session={} name={} err={}", sid, name, e);
            release_charter_fee(&mut w, sid, char_id);
            if matches!(e, StorageError::Conflict(_)) {
                msg(&w, sid, MSG_NAME_TAKEN, &[]);
            } else {
                w.send_to(sid, build_chat_line(9, "The clan could not be founded. Try again later."));
            }
            return;
        }
    };
    if !register_charter(&mut w, sid, char_id, Clan::new(clan_id, name, char_id, &char_name, found)) {
        drop(w);
        // The founder left mid-write and was saved with the fee still held.
        tracing::warn!("[clan] [create_abandoned] clan={} name={} leader={}", clan_id, name, char_id);
        if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.dissolve_clan(clan_id)).await {
            tracing::error!("[clan] [abandon_failed] clan={} err={}", clan_id, e);
        }
        return;
    }
    tracing::info!("[clan] [created] clan={} name={} leader={}", clan_id, name, char_name);
}

/// Check a charter request and take the fee out of the inventory into
/// the player's held gold. Returns the founder's id and name.
fn hold_charter_fee(w: &mut WorldState, sid: u64, name: &str, cost: i32) -> Option<(i32, String)> {
    let p = w.player(sid)?;
    if p.held_gold.is_some() {
        return None;
    }
    if p.class_type != CROWN {
        msg(w, sid, MSG_NOT_CROWN, &[]);
        return None;
    }
    if p.clan_id != 0 {
        msg(w, sid, MSG_ALREADY_IN_CLAN, &[]);
        return None;
    }
    if w.clans.name_exists(name) {
        msg(w, sid, MSG_NAME_TAKEN, &[]);
        return None;
    }
    if p.inventory.gold() < cost {
        msg(w, sid, MSG_NO_GOLD, &[]);
        return None;
    }
    let founder = (p.char_id, p.name.clone());
    let stack = p.inventory.gold_obj();
    if cost > 0 {
        let obj_id = stack?;
        if !spend_gold(w, sid, cost) {
            msg(w, sid, MSG_NO_GOLD, &[]);
            return None;
        }
        if let Some(p) = w.player_mut(sid) {
            p.held_gold = Some(HeldGold { obj_id, amount: cost });
        }
        send_weight(w, sid);
    }
    Some(founder)
}

/// Put a held fee back after a failed charter write.
fn release_charter_fee(w: &mut WorldState, sid: u64, char_id: i32) {
    let Some(held) = w.player_mut(sid).filter(|p| p.char_id == char_id).and_then(|p| p.held_gold.take()) else {
        return;
    };
    give_gold(w, sid, held.amount);
}

/// Spend the held fee and seat the founder as prince. Returns false when
/// the founder is no longer in the world.
fn register_charter(w: &mut WorldState, sid: u64, char_id: i32, clan: Clan) -> bool {
    let Some(p) = w.player_mut(sid).filter(|p| p.char_id == char_id) else {
        return false;
    };
    p.held_gold = None;
    p.clan_id = clan.id;
    p.clan_name = clan.name.clone();
    p.clan_rank = RANK_PRINCE;
    let name = clan.name.clone();
    w.clans.insert(clan);
    msg(w, sid, MSG_CREATED, &[&name]);
    announce_banner(w, sid, true);
    true
}

/// Ask the nearest prince or guardian to take `sid` in.
pub fn request_join(w: &mut WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    if p.clan_id != 0 {
        msg(w, sid, MSG_APPLICANT_IN_CLAN, &[]);
        return;
    }
    let (char_id, name, map, x, y) = (p.char_id, p.name.clone(), p.map, p.x, p.y);
    let leader = w
        .nearby_players_within(map, x, y, JOIN_RANGE, sid)
        .into_iter()
        .filter_map(|s| w.player(s).map(|o| (s, o)))
        .filter(|(_, o)| o.clan_id != 0 && matches!(o.clan_rank, RANK_PRINCE | RANK_GUARDIAN))
        .min_by_key(|(_, o)| chebyshev(x, y, o.x, o.y))
        .map(|(s, _)| s);
    let Some(leader) = leader else {
        msg(w, sid, MSG_NO_LEADER_NEAR, &[]);
        return;
    };
    ask_yes_no(w, leader, YN_CLAN_JOIN, char_id, &[&name]);
}

/// The prince or guardian `sid` answered an application from `applicant_char`.
pub async fn answer_join(ctx: &GameCtx, sid: u64, applicant_char: i32, accepted: bool) {
    if !accepted {
        return;
    }
    let (clan_id, clan_name, applicant_name) = {
        let w = ctx.world.read().await;
        let Some(leader) = w.player(sid) else {
            return;
        };
        if leader.clan_id == 0 {
            return;
        }
        let Some(applicant) = w.player_by_char(applicant_char) else {
            return;
        };
        if applicant.clan_id != 0 {
            msg(&w, sid, MSG_APPLICANT_IN_CLAN, &[]);
            return;
        }
        (leader.clan_id, leader.clan_name.clone(), applicant.name.clone())
    };

    let row = ClanMemberRow {
        clan_id,
        char_id: applicant_char,
        name: applicant_name.clone(),
        rank: RANK_PUBLIC,
        notes: Vec::new(),
    };
    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.add_clan_member(&row, &clan_name)).await {
        tracing::error!("[clan] [join_failed] clan={} char={} err={}", clan_id, applicant_char, e);
        return;
    }

    let mut w = ctx.world.write().await;
    let member = ClanMember { char_id: applicant_char, name: applicant_name.clone(), rank: RANK_PUBLIC, notes: Vec::new() };
    if !w.clans.add_member(clan_id, member) {
        tracing::error!("[clan] [join_vanished] clan={} char={}", clan_id, applicant_char);
        return;
    }
    let Some(applicant) = w.session_of_char(applicant_char) else {
        return;
    };
    if let Some(p) = w.player_mut(applicant) {
        p.clan_id = clan_id;
        p.clan_name = clan_name.clone();
        p.clan_rank = RANK_PUBLIC;
    }
    msg(&w, applicant, MSG_JOINED, &[&clan_name]);
    announce_banner(&w, applicant, true);
    msg(&w, sid, MSG_JOIN_ACCEPTED, &[&applicant_name]);
    tracing::info!("[clan] [joined] clan={} char={}", clan_id, applicant_char);
}

/// Leave the clan. A prince leaving dissolves it.
pub async fn leave(ctx: &GameCtx, sid: u64) {
    let (clan_id, char_id, name, is_leader) = {
        let w = ctx.world.read().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        let Some(clan) = w.clans.get(p.clan_id) else {
            return;
        };
        let is_leader = p.class_type == CROWN && clan.leader_id == p.char_id;
        if is_leader && (clan.has_castle || clan.has_house) {
            msg(&w, sid, MSG_HAS_ESTATE, &[]);
            return;
        }
        (clan.id, p.char_id, p.name.clone(), is_leader)
    };

    if is_leader {
        dissolve(ctx, clan_id, &name).await;
        return;
    }

    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.remove_clan_member(clan_id, char_id)).await {
        tracing::error!("[clan] [leave_failed] clan={} char={} err={}", clan_id, char_id, e);
        return;
    }
    let mut w = ctx.world.write().await;
    w.clans.remove_member(clan_id, char_id);
    let clan_name = w.clans.get(clan_id).map(|c| c.name.clone()).unwrap_or_default();
    clear_membership(&mut w, char_id);
    announce_banner(&w, sid, false);
    let notice = build_message_code(MSG_LEFT, &[&name, &clan_name]);
    let online: Vec<u64> = w
        .clans
        .get(clan_id)
        .map(|c| c.members.keys().filter_map(|&id| w.session_of_char(id)).collect())
        .unwrap_or_default();
    for s in online {
        w.send_to(s, notice.clone());
    }
    tracing::info!("[clan] [left] clan={} char={}", clan_id, char_id);
}

async fn dissolve(ctx: &GameCtx, clan_id: i32, leader_name: &str) {
    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.dissolve_clan(clan_id)).await {
        tracing::error!("[clan] [dissolve_failed] clan={} err={}", clan_id, e);
        return;
    }
    let mut w = ctx.world.write().await;
    let Some(clan) = w.clans.remove(clan_id) else {
        return;
    };
    for &char_id in clan.members.keys() {
        let Some(s) = clear_membership(&mut w, char_id) else {
            continue;
        };
        msg(&w, s, MSG_DISSOLVED, &[leader_name]);
        announce_banner(&w, s, false);
    }
    tracing::info!("[clan] [dissolved] clan={} name={}", clan_id, clan.name);
}

/// Expel `target_name`, online or not. Only the prince may do this.
pub async fn ban(ctx: &GameCtx, sid: u64, target_name: &str) {
    let (clan_id, clan_name, online_target) = {
        let w = ctx.world.read().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        let leads = p.class_type == CROWN && w.clans.get(p.clan_id).is_some_and(|c| c.leader_id == p.char_id);
        if !leads {
            msg(&w, sid, MSG_NO_RIGHTS, &[]);
            return;
        }
        if p.name.eq_ignore_ascii_case(target_name) {
            return;
        }
        let online = w.player_by_name(target_name).map(|t| (t.char_id, t.clan_id));
        (p.clan_id, p.clan_name.clone(), online)
    };

    let target_char = match online_target {
        Some((char_id, c)) if c == clan_id => char_id,
        Some(_) => {
            ctx.world.read().await.send_to(sid, build_message_code(MSG_NOT_MEMBER, &[]));
            return;
        }
        None => match with_deadline(DB_DEADLINE, ctx.storage.offline_clan_of(target_name)).await {
            Ok(Some((char_id, c))) if c == clan_id => char_id,
            Ok(_) => {
                ctx.world.read().await.send_to(sid, build_message_code(MSG_NOT_MEMBER, &[]));
                return;
            }
            Err(e) => {
                tracing::error!("[clan] [ban_lookup_failed] clan={} target={} err={}", clan_id, target_name, e);
                return;
            }
        },
    };

    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.remove_clan_member(clan_id, target_char)).await {
        tracing::error!("[clan] [ban_failed] clan={} char={} err={}", clan_id, target_char, e);
        return;
    }
    let mut w = ctx.world.write().await;
    w.clans.remove_member(clan_id, target_char);
    if let Some(s) = clear_membership(&mut w, target_char) {
        msg(&w, s, MSG_BANNED, &[&clan_name]);
        announce_banner(&w, s, false);
    }
    msg(&w, sid, MSG_BAN_DONE, &[target_name]);
    tracing::info!("[clan] [banned] clan={} char={}", clan_id, target_char);
}

fn pledge_row<'a>(w: &'a WorldState, m: &'a ClanMember) -> PledgeRow<'a> {
    let online = w.player_by_char(m.char_id);
    PledgeRow {
        name: &m.name,
        rank: m.rank,
        level: online.map(|o| o.level).unwrap_or(0),
        notes: &m.notes,
        char_id: m.char_id,
        class_type: online.map(|o| o.class_type).unwrap_or(0),
    }
}

/// Announcement plus the full and online member lists.
pub fn who(w: &WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(clan) = w.clans.get(p.clan_id) else {
        msg(w, sid, MSG_NOT_IN_CLAN, &[]);
        return;
    };
    let members = clan.sorted_members();
    let every: Vec<PledgeRow<'_>> = members.iter().map(|m| pledge_row(w, m)).collect();
    let online: Vec<PledgeRow<'_>> = members
        .iter()
        .filter(|m| w.player_by_char(m.char_id).is_some())
        .map(|m| pledge_row(w, m))
        .collect();

    p.session.send(build_pledge_announce(clan));
    p.session.send(build_pledge_members(EV_PLEDGE_MEMBERS, &every));
    p.session.send(build_pledge_members(EV_PLEDGE_ONLINE, &online));
}

pub const WATCH_ANNOUNCEMENT: u8 = 15;
pub const WATCH_NOTES: u8 = 16;

/// Edit the clan announcement (prince only) or one's own member notes.
pub async fn pledge_watch(ctx: &GameCtx, sid: u64, kind: u8, text: &str) {
    let (clan_id, char_id, rank) = {
        let w = ctx.world.read().await;
        match w.player(sid) {
            Some(p) if p.clan_id != 0 => (p.clan_id, p.char_id, p.clan_rank),
            _ => return,
        }
    };
    match kind {
        WATCH_ANNOUNCEMENT => {
            if rank != RANK_PRINCE {
                ctx.world.read().await.send_to(sid, build_message_code(MSG_NO_RIGHTS, &[]));
                return;
            }
            let raw = truncate_big5(text, ANNOUNCEMENT_LEN);
            if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.update_announcement(clan_id, &raw)).await {
                tracing::error!("[clan] [announce_failed] clan={} err={}", clan_id, e);
                return;
            }
            if let Some(c) = ctx.world.write().await.clans.get_mut(clan_id) {
                c.announcement = raw;
            }
        }
        WATCH_NOTES => {
            let raw = truncate_big5(text, NOTES_LEN);
            if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.update_member_notes(clan_id, char_id, &raw)).await {
                tracing::error!("[clan] [notes_failed] clan={} char={} err={}", clan_id, char_id, e);
                return;
            }
            let mut w = ctx.world.write().await;
            if let Some(m) = w.clans.get_mut(clan_id).and_then(|c| c.members.get_mut(&char_id)) {
                m.notes = raw;
            }
        }
        _ => {}
    }
}

/// Sub-command 1 grants `rank` to the member `name`; other sub-commands are ignored.
pub async fn rank_control(ctx: &GameCtx, sid: u64, data: u8, rank: i32, name: &str) {
    if data != 1 {
        return;
    }
    let (clan_id, target_char) = {
        let w = ctx.world.read().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        let Some(clan) = w.clans.get(p.clan_id) else {
            return;
        };
        if clan.leader_id != p.char_id || !can_grant_rank(RANK_PRINCE, rank) {
            msg(&w, sid, MSG_NO_RIGHTS, &[]);
            return;
        }
        let Some(m) = clan.member_by_name(name) else {
            msg(&w, sid, MSG_NOT_MEMBER, &[]);
            return;
        };
        if m.char_id == p.char_id {
            return;
        }
        (clan.id, m.char_id)
    };

    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.update_member_rank(clan_id, target_char, rank)).await {
        tracing::error!("[clan] [rank_failed] clan={} char={} err={}", clan_id, target_char, e);
        return;
    }
    let mut w = ctx.world.write().await;
    w.clans.set_rank(clan_id, target_char, rank);
    if let Some(p) = w.player_by_char_mut(target_char) {
        p.clan_rank = rank;
    }
    tracing::info!("[clan] [rank_changed] clan={} char={} rank={}", clan_id, target_char, rank);
}

/// Longest title the client renders.
pub const TITLE_LEN: usize = 16;

/// Set a character title. Players may title themselves; a prince may title
/// any online member of the clan. The title is saved with the character.
pub fn set_title(w: &mut WorldState, sid: u64, target_name: &str, title: &str) -> bool {
    let Some(p) = w.player(sid) else {
        return false;
    };
    let (own_char, own_clan, own_rank) = (p.char_id, p.clan_id, p.clan_rank);
    let Some(target) = w.session_of_name(target_name) else {
        msg(w, sid, MSG_NOT_MEMBER, &[]);
        return false;
    };
    let Some(t) = w.player(target) else {
        return false;
    };
    if t.char_id != own_char && (own_clan == 0 || t.clan_id != own_clan || own_rank != RANK_PRINCE) {
        msg(w, sid, MSG_NO_RIGHTS, &[]);
        return false;
    }
    let title = decode_big5(&truncate_big5(title, TITLE_LEN));
    let Some(t) = w.player_mut(target) else {
        return false;
    };
    t.title = title.clone();
    let obj = t.object_id();
    w.broadcast_with_self(target, &build_char_title(obj, &title));
    tracing::debug!("[clan] [title] session={} target={} title={}", sid, target_name, title);
    true
}

fn emblem_path(ctx: &GameCtx, emblem_id: i32) -> PathBuf {
    PathBuf::from(&ctx.config.emblem_dir).join(emblem_id.to_string())
}

/// Store a new emblem for the prince's clan and tell every online member.
pub async fn upload_emblem(ctx: &GameCtx, sid: u64, data: &[u8]) {
    if data.len() < EMBLEM_LEN {
        return;
    }
    let data = &data[..EMBLEM_LEN];
    let (clan_id, emblem_id) = {
        let mut w = ctx.world.write().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        if p.clan_id == 0 || p.clan_rank != RANK_PRINCE {
            return;
        }
        let clan_id = p.clan_id;
        (clan_id, w.next_emblem_id())
    };

    let path = emblem_path(ctx, emblem_id);
    if let Some(dir) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::error!("[clan] [emblem_dir_failed] path={} err={}", dir.display(), e);
            return;
        }
    }
    if let Err(e) = tokio::fs::write(&path, data).await {
        tracing::error!("[clan] [emblem_write_failed] clan={} err={}", clan_id, e);
        return;
    }
    if let Err(e) = with_deadline(DB_DEADLINE, ctx.storage.update_emblem(clan_id, emblem_id)).await {
        tracing::error!("[clan] [emblem_update_failed] clan={} err={}", clan_id, e);
        return;
    }

    let mut w = ctx.world.write().await;
    let Some(clan) = w.clans.get_mut(clan_id) else {
        return;
    };
    clan.emblem_id = emblem_id;
    clan.emblem_status = 1;
    let members: Vec<i32> = clan.members.keys().copied().collect();
    for char_id in members {
        if let Some(p) = w.player_by_char(char_id) {
            p.session.send(build_emblem_reset(p.object_id(), emblem_id));
        }
    }
    tracing::info!("[clan] [emblem_uploaded] clan={} emblem={}", clan_id, emblem_id);
}

/// Send a stored emblem. Unknown ids are ignored.
pub async fn download_emblem(ctx: &GameCtx, sid: u64, emblem_id: i32) {
    if emblem_id <= 0 {
        return;
    }
    let Ok(data) = tokio::fs::read(emblem_path(ctx, emblem_id)).await else {
        return;
    };
    ctx.world.read().await.send_to(sid, build_emblem(emblem_id, &data));
}
