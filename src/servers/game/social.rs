//! Yes-no answers, trade, party and clan handlers.

use std::sync::Arc;

use super::{GameServer, HandlerResult};
use crate::game::{clan, party, trade};
use crate::network::opcodes::{ATTR_IGNORED, YN_CHAT_PARTY, YN_CLAN_JOIN, YN_PARTY, YN_TRADE};
use crate::network::packet::Reader;
use crate::session::Session;
use crate::world::WorldState;

const PARTY_NORMAL: u8 = 0;
const PARTY_AUTO_SHARE: u8 = 1;
const PARTY_CHAT: u8 = 2;
const PARTY_TRANSFER_LEADER: u8 = 3;

/// Consume the player's pending prompt. Returns who raised it when the
/// answer is for the prompt actually shown; anything else is stale.
pub fn take_prompt(w: &mut WorldState, sid: u64, kind: u16) -> Option<i32> {
    let p = w.player_mut(sid)?;
    let pending = p.pending.take()?;
    if pending.kind != kind {
        tracing::debug!("[social] [stale_answer] session={} pending={} answered={}", sid, pending.kind, kind);
        return None;
    }
    Some(pending.from_char)
}

pub async fn yes_no(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    if r.h()? == ATTR_IGNORED {
        return Ok(());
    }
    let _counter = r.d()?;
    let kind = r.h()?;
    let accepted = r.h()? != 0;

    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    let Some(from_char) = take_prompt(&mut w, s.id, kind) else {
        return Ok(());
    };
    match kind {
        YN_TRADE => trade::answer(&mut w, s.id, from_char, accepted),
        YN_PARTY | YN_CHAT_PARTY => party::answer_invite(&mut w, s.id, from_char, accepted),
        YN_CLAN_JOIN => {
            drop(w);
            clan::answer_join(ctx, s.id, from_char, accepted).await;
        }
        other => tracing::debug!("[social] [unrouted_answer] session={} kind={}", s.id, other),
    }
    Ok(())
}

pub async fn trade_request(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let mut w = srv.ctx.world.write().await;
    trade::request(&mut w, s.id);
    Ok(())
}

pub async fn trade_add(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let obj = r.d()? as u32;
    let count = r.d()?;
    let mut w = srv.ctx.world.write().await;
    trade::add(&mut w, s.id, obj, count);
    Ok(())
}

pub async fn trade_accept(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    trade::accept(&srv.ctx, s.id).await;
    Ok(())
}

pub async fn trade_cancel(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let mut w = srv.ctx.world.write().await;
    trade::cancel(&mut w, s.id);
    Ok(())
}

pub async fn party_control(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let kind = r.c()?;
    match kind {
        PARTY_NORMAL | PARTY_AUTO_SHARE => {
            let target = r.d()?;
            let mut w = srv.ctx.world.write().await;
            party::invite(&mut w, s.id, target, kind);
        }
        PARTY_TRANSFER_LEADER => {
            let target = r.d()?;
            let mut w = srv.ctx.world.write().await;
            party::transfer_leader(&mut w, s.id, target);
        }
        PARTY_CHAT => tracing::debug!("[social] [chat_party_ignored] session={}", s.id),
        other => tracing::debug!("[social] [party_kind_unknown] session={} kind={}", s.id, other),
    }
    Ok(())
}

pub async fn party_who(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let w = srv.ctx.world.read().await;
    party::who(&w, s.id);
    Ok(())
}

pub async fn party_leave(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let mut w = srv.ctx.world.write().await;
    party::leave(&mut w, s.id);
    Ok(())
}

pub async fn party_banish(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let mut w = srv.ctx.world.write().await;
    party::banish(&mut w, s.id, &name);
    Ok(())
}

pub async fn clan_create(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    if name.is_empty() {
        return Ok(());
    }
    clan::create(&srv.ctx, s.id, &name).await;
    Ok(())
}

pub async fn clan_join(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let mut w = srv.ctx.world.write().await;
    clan::request_join(&mut w, s.id);
    Ok(())
}

pub async fn clan_leave(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    clan::leave(&srv.ctx, s.id).await;
    Ok(())
}

pub async fn clan_ban(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    if name.is_empty() {
        return Ok(());
    }
    clan::ban(&srv.ctx, s.id, &name).await;
    Ok(())
}

pub async fn clan_who(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let w = srv.ctx.world.read().await;
    clan::who(&w, s.id);
    Ok(())
}

pub async fn clan_watch(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let kind = r.c()?;
    let text = if r.remaining() > 0 { r.s()? } else { String::new() };
    clan::pledge_watch(&srv.ctx, s.id, kind, &text).await;
    Ok(())
}

pub async fn clan_rank(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let data = r.c()?;
    let rank = r.c()? as i32;
    let name = r.s()?;
    clan::rank_control(&srv.ctx, s.id, data, rank, &name).await;
    Ok(())
}

pub async fn set_title(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let target = r.s()?;
    let title = r.s()?;
    let mut w = srv.ctx.world.write().await;
    clan::set_title(&mut w, s.id, &target, &title);
    Ok(())
}

pub async fn upload_emblem(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let data = r.rest();
    clan::upload_emblem(&srv.ctx, s.id, data).await;
    Ok(())
}

pub async fn download_emblem(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let emblem_id = r.d()?;
    clan::download_emblem(&srv.ctx, s.id, emblem_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::world::player::{test_support::player, PendingPrompt};

    #[test]
    fn test_prompt_taken_once() {
        let mut w = WorldState::new(Arc::new(Content::default()));
        let (mut p, _rx) = player(1, 100, "Alice");
        p.pending = Some(PendingPrompt { kind: YN_TRADE, from_char: 200 });
        w.add_player(p).unwrap();
        assert_eq!(take_prompt(&mut w, 1, YN_TRADE), Some(200));
        assert_eq!(take_prompt(&mut w, 1, YN_TRADE), None);
    }

    #[test]
    fn test_mismatched_answer_is_dropped() {
        let mut w = WorldState::new(Arc::new(Content::default()));
        let (mut p, _rx) = player(1, 100, "Alice");
        p.pending = Some(PendingPrompt { kind: YN_PARTY, from_char: 200 });
        w.add_player(p).unwrap();
        assert_eq!(take_prompt(&mut w, 1, YN_TRADE), None);
        assert!(w.player(1).unwrap().pending.is_none());
        assert_eq!(take_prompt(&mut w, 2, YN_TRADE), None);
    }
}
