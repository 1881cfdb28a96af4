//! NPC dialogs, item use, companions and the pluggable managers.
//!
//! The core routes what it owns itself (warehouse, teleporters, companion
//! modes) and hands every other command to whichever collaborator is
//! wired in. An empty collaborator slot makes the command a no-op.

use std::sync::Arc;

use super::{GameServer, HandlerResult};
use crate::game::types::chebyshev;
use crate::game::warehouse::{self, MAX_ORDERS};
use crate::game::{item, movement, pet, trade, Deps};
use crate::network::packet::Reader;
use crate::session::Session;
use crate::world::WorldState;

/// How far from an NPC a player may be to talk to it or use its commands.
pub const NPC_RANGE: i32 = 5;

/// What an NPC command turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcRoute {
    Handled,
    /// The warehouse list must be loaded from storage first
    Warehouse,
    Ignored,
}

/// Template id of the NPC `obj` when the player can reach it.
fn npc_in_reach(w: &WorldState, sid: u64, obj: u32) -> Option<i32> {
    let p = w.player(sid)?;
    let n = w.npcs.get(&obj)?;
    (!n.dead && n.map == p.map && chebyshev(p.x, p.y, n.x, n.y) <= NPC_RANGE).then_some(n.template_id)
}

fn handled(done: bool) -> NpcRoute {
    if done {
        NpcRoute::Handled
    } else {
        NpcRoute::Ignored
    }
}

/// Route one NPC command posted against `obj`.
pub fn route_npc_action(w: &mut WorldState, deps: &Deps, sid: u64, obj: u32, action: &str) -> NpcRoute {
    let Some(p) = w.player(sid) else {
        return NpcRoute::Ignored;
    };
    if p.dead {
        return NpcRoute::Ignored;
    }
    // summon choices come back against the player's own object
    if obj == p.object_id() {
        return handled(deps.summon.as_ref().is_some_and(|m| m.summon(w, sid, action)));
    }
    if w.companions.contains_key(&obj) {
        return handled(pet::handle_action(w, sid, obj, action));
    }
    let Some(template) = npc_in_reach(w, sid, obj) else {
        tracing::debug!("[action] [npc_out_of_reach] session={} obj={}", sid, obj);
        return NpcRoute::Ignored;
    };
    trade::cancel(w, sid);

    let lower = action.to_ascii_lowercase();
    if lower == "retrieve" || lower == "deposit" {
        return NpcRoute::Warehouse;
    }
    if w.content.maps.teleport(template, action).is_some() {
        movement::npc_teleport(w, sid, template, action);
        return NpcRoute::Handled;
    }
    if deps.npc_service.as_ref().is_some_and(|m| m.npc_action(w, sid, obj, action)) {
        return NpcRoute::Handled;
    }
    if deps.polymorph.as_ref().is_some_and(|m| m.polymorph(w, sid, action)) {
        return NpcRoute::Handled;
    }
    if deps.craft.as_ref().is_some_and(|m| m.craft(w, sid, obj, action)) {
        return NpcRoute::Handled;
    }
    tracing::debug!("[action] [unhandled] session={} npc={} action={}", sid, template, action);
    NpcRoute::Ignored
}

pub async fn npc_talk(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    if w.companions.contains_key(&obj) {
        pet::open_menu(&w, s.id, obj);
        return Ok(());
    }
    if npc_in_reach(&w, s.id, obj).is_none() {
        return Ok(());
    }
    if let Some(m) = ctx.deps.npc_service.as_ref() {
        m.npc_talk(&mut w, s.id, obj);
    }
    Ok(())
}

pub async fn npc_action(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let action = r.s()?;
    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    if route_npc_action(&mut w, &ctx.deps, s.id, obj, &action) == NpcRoute::Warehouse {
        drop(w);
        warehouse::open(ctx, s.id, obj).await;
    }
    Ok(())
}

/// Result of a shop or warehouse window: `D npc, C type, H count` then
/// `count` pairs of `D object, D amount`.
pub fn parse_orders(r: &mut Reader<'_>) -> Result<(u32, u8, Vec<(u32, i32)>), crate::network::packet::PacketError> {
    let npc_obj = r.d()? as u32;
    let result_type = r.c()?;
    let count = r.h()? as usize;
    let mut orders = Vec::with_capacity(count.min(MAX_ORDERS));
    for _ in 0..count {
        let obj = r.d()? as u32;
        let amount = r.d()?;
        orders.push((obj, amount));
    }
    Ok((npc_obj, result_type, orders))
}

pub async fn buy_sell(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let (npc_obj, result_type, orders) = parse_orders(r)?;
    let ctx = &srv.ctx;
    if result_type >= warehouse::RESULT_DEPOSIT {
        warehouse::handle_result(ctx, s.id, result_type, &orders).await;
        return Ok(());
    }
    let mut w = ctx.world.write().await;
    if npc_in_reach(&w, s.id, npc_obj).is_none() {
        return Ok(());
    }
    let done = ctx
        .deps
        .npc_service
        .as_ref()
        .is_some_and(|m| m.shop_result(&mut w, s.id, npc_obj, result_type, &orders));
    if !done {
        tracing::debug!("[action] [shop_unhandled] session={} npc_obj={} type={}", s.id, npc_obj, result_type);
    }
    Ok(())
}

pub async fn use_item(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    if item::use_item(&mut w, s.id, obj) {
        return Ok(());
    }
    if let Some(m) = ctx.deps.doll.as_ref() {
        m.use_doll(&mut w, s.id, obj);
    }
    Ok(())
}

pub async fn pet_menu(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let w = srv.ctx.world.read().await;
    pet::open_menu(&w, s.id, obj);
    Ok(())
}

pub async fn pet_item(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let _data = r.c()?;
    let obj = r.d()? as u32;
    let list_no = r.c()?;
    let w = srv.ctx.world.read().await;
    pet::use_item(&w, s.id, obj, list_no);
    Ok(())
}

/// Text typed into a dialog; the only core use is the polymorph prompt.
pub async fn hypertext_input(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let _obj = r.d()?;
    let input = r.s()?;
    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    if w.player(s.id).is_none_or(|p| p.dead) {
        return Ok(());
    }
    if let Some(m) = ctx.deps.polymorph.as_ref() {
        m.polymorph(&mut w, s.id, &input);
    }
    Ok(())
}

pub async fn mail(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let payload = r.rest();
    let ctx = &srv.ctx;
    let Some(m) = ctx.deps.mail.as_ref() else {
        return Ok(());
    };
    let mut w = ctx.world.write().await;
    m.handle_mail(&mut w, s.id, payload);
    Ok(())
}
