//! Handlers for what a player does on the map: walking, talking, items
//! and queueing combat.

use std::sync::Arc;

use super::{GameServer, HandlerResult};
use crate::database::magic_db::{skill_id_from_slot, SKILL_MASS_TELEPORT, SKILL_TELEPORT};
use crate::game::movement::MOVE_HEADING_KEY;
use crate::game::{bookmark, chat, item, movement, timed_map};
use crate::network::packet::Reader;
use crate::session::Session;
use crate::tick::queue::{AttackRequest, SkillRequest};

/// C_WINDOWS sub-type asking for the timed-map list.
const WINDOW_MAP_TIMES: u8 = 9;

pub async fn move_step(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    // client coordinates are ignored; only the heading counts
    let _x = r.h()?;
    let _y = r.h()?;
    let heading = r.c()? ^ MOVE_HEADING_KEY;
    let mut w = srv.ctx.world.write().await;
    movement::step(&mut w, s.id, heading);
    Ok(())
}

pub async fn change_direction(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let heading = r.c()?;
    let mut w = srv.ctx.world.write().await;
    movement::change_direction(&mut w, s.id, heading);
    Ok(())
}

pub async fn enter_portal(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let x = r.h()? as i32;
    let y = r.h()? as i32;
    let mut w = srv.ctx.world.write().await;
    movement::enter_portal(&mut w, s.id, x, y);
    Ok(())
}

pub async fn confirm_teleport(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let mut w = srv.ctx.world.write().await;
    movement::confirm_teleport(&mut w, s.id);
    Ok(())
}

pub async fn open_door(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let _x = r.h()?;
    let _y = r.h()?;
    let obj = r.d()? as u32;
    let mut w = srv.ctx.world.write().await;
    movement::toggle_door(&mut w, s.id, obj);
    Ok(())
}

pub async fn add_bookmark(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let mut w = srv.ctx.world.write().await;
    bookmark::add(&mut w, s.id, &name);
    Ok(())
}

pub async fn delete_bookmark(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let mut w = srv.ctx.world.write().await;
    bookmark::delete(&mut w, s.id, &name);
    Ok(())
}

pub async fn chat(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let kind = r.c()?;
    let text = r.s()?;
    if text.is_empty() {
        return Ok(());
    }
    let mut w = srv.ctx.world.write().await;
    chat::say(&mut w, s.id, kind, &text);
    Ok(())
}

pub async fn whisper(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let target = r.s()?;
    let text = r.s()?;
    if target.is_empty() || text.is_empty() {
        return Ok(());
    }
    let w = srv.ctx.world.read().await;
    chat::whisper(&w, s.id, &target, &text);
    Ok(())
}

pub async fn windows(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    match r.c()? {
        WINDOW_MAP_TIMES => {
            let w = srv.ctx.world.read().await;
            timed_map::send_time_list(&w, s.id);
        }
        other => tracing::trace!("[field] [window_ignored] session={} kind={}", s.id, other),
    }
    Ok(())
}

pub async fn drop_item(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let count = r.d()?;
    let mut w = srv.ctx.world.write().await;
    item::drop_item(&mut w, s.id, obj, count);
    Ok(())
}

pub async fn pick_up(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let _x = r.h()?;
    let _y = r.h()?;
    let obj = r.d()? as u32;
    let _count = r.d()?;
    let mut w = srv.ctx.world.write().await;
    item::pick_up(&mut w, s.id, obj);
    Ok(())
}

pub async fn destroy_item(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let count = r.d()?;
    let mut w = srv.ctx.world.write().await;
    item::destroy_item(&mut w, s.id, obj, count);
    Ok(())
}

/// Attacks are resolved by the tick; the handler only queues them.
pub fn attack(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>, ranged: bool) -> HandlerResult {
    let target = r.d()? as u32;
    let x = r.h()? as i32;
    let y = r.h()? as i32;
    let req = AttackRequest { session_id: s.id, target, ranged, x, y };
    if !srv.ctx.queues.push_attack(req) {
        tracing::warn!("[field] [attack_dropped] session={} target={}", s.id, target);
    }
    Ok(())
}

/// Parse a spell slot and its optional target. Teleport spells carry a
/// bookmark id instead of a target object.
pub fn parse_spell(session_id: u64, r: &mut Reader<'_>) -> Result<SkillRequest, crate::network::packet::PacketError> {
    let row = r.c()?;
    let col = r.c()?;
    let skill_id = skill_id_from_slot(row, col);
    let mut req = SkillRequest { session_id, skill_id, target: 0, x: 0, y: 0 };
    if (skill_id == SKILL_TELEPORT || skill_id == SKILL_MASS_TELEPORT) && r.remaining() >= 6 {
        let _map = r.h()?;
        req.target = r.d()? as u32;
    } else if r.remaining() >= 8 {
        req.target = r.d()? as u32;
        req.x = r.h()? as i32;
        req.y = r.h()? as i32;
    }
    Ok(req)
}

pub fn use_spell(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let req = parse_spell(s.id, r)?;
    if !srv.ctx.queues.push_skill(req) {
        tracing::warn!("[field] [skill_dropped] session={} skill_id={}", s.id, req.skill_id);
    }
    Ok(())
}
