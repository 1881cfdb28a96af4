//! Entering and leaving the world.

use std::sync::Arc;

use bytes::Bytes;

use super::{account, GameServer, HandlerResult};
use crate::core::{game_clock, TICKS_PER_SECOND};
use crate::game::packets::{
    build_bookmarks, build_buff_icon, build_char_config, build_clan_attention, build_clan_name, build_enter_world_check,
    build_inventory_list, build_logout, build_magic_status, build_map_id, build_own_char_pack, build_skill_list,
    build_status, build_time, build_weather,
};
use crate::game::{combat, item, party, timed_map, trade, view, warehouse, GameCtx};
use crate::network::packet::Reader;
use crate::persist::snapshot::{build_player, load_character_state, save_snapshot, PlayerSnapshot};
use crate::persist::worker::PersistJob;
use crate::persist::{with_deadline, DB_DEADLINE};
use crate::session::{CloseReason, Session, SessionState};
use crate::world::player::Player;
use crate::world::WorldState;

/// Largest character-config payload the client may store.
pub const MAX_CHAR_CONFIG: usize = 8192;

/// Everything the client needs before it draws the world, in the order it
/// expects them. The view and the game clock follow once the player is
/// placed.
pub fn enter_burst(w: &WorldState, p: &Player, config: Option<&[u8]>, unix_now: i64) -> Vec<Bytes> {
    let content = &w.content;
    let in_clan = p.clan_id > 0;
    let mut out = vec![
        build_enter_world_check(in_clan.then_some(p.char_id)),
        build_inventory_list(p.inventory.items(), content),
        build_status(p, content, unix_now),
        build_map_id(p.map, content.maps.is_underwater(p.map)),
        build_own_char_pack(p),
        build_magic_status(p.stats.sp, p.stats.mr),
        build_weather(w.weather),
        build_skill_list(&content.skills.spell_bitmap(&p.known_spells)),
        build_bookmarks(&p.bookmarks),
    ];
    if let Some(pkt) = config.and_then(build_char_config) {
        out.push(pkt);
    }
    if in_clan {
        out.push(build_clan_name(p.object_id(), &p.clan_name, p.clan_id, true));
        out.push(build_clan_attention());
    }
    out
}

/// Icons for buffs that survived the last logout.
fn restored_buff_icons(p: &Player) -> Vec<Bytes> {
    p.buffs
        .iter()
        .filter(|b| b.icon > 0)
        .map(|b| {
            let secs = (b.remaining_ticks as u64 / TICKS_PER_SECOND).min(u16::MAX as u64) as u16;
            build_buff_icon(b.icon, secs)
        })
        .collect()
}

pub async fn enter_world(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let name = r.s()?;
    let Some(account) = s.account() else {
        return Ok(());
    };
    let ctx = &srv.ctx;

    let row = match with_deadline(DB_DEADLINE, ctx.storage.load_character(&name)).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            tracing::warn!("[enter] [unknown_char] session={} account={} name={}", s.id, account, name);
            s.close(CloseReason::Kicked);
            return Ok(());
        }
        Err(e) => {
            tracing::error!("[enter] [load_failed] session={} name={} err={}", s.id, name, e);
            s.close(CloseReason::Kicked);
            return Ok(());
        }
    };
    if row.account != account || row.delete_at.is_some() {
        tracing::warn!(
            "[enter] [refused] session={} account={} name={} owner={} pending_delete={}",
            s.id,
            account,
            name,
            row.account,
            row.delete_at.is_some()
        );
        s.close(CloseReason::Kicked);
        return Ok(());
    }

    let char_id = row.id;
    let loaded = match load_character_state(ctx.storage.as_ref(), row).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("[enter] [state_failed] session={} char_id={} err={}", s.id, char_id, e);
            s.close(CloseReason::Kicked);
            return Ok(());
        }
    };
    let config = match with_deadline(DB_DEADLINE, ctx.storage.load_char_config(char_id)).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("[enter] [config_failed] char_id={} err={}", char_id, e);
            None
        }
    };

    let now = chrono::Utc::now().timestamp();
    let mut w = ctx.world.write().await;
    let mut p = build_player(Arc::clone(s), loaded, &w.content);
    if p.inventory.is_empty() && ctx.config.start_adena > 0 {
        let obj = w.ids.next_object();
        p.inventory.add(item::gold_item(obj, ctx.config.start_adena));
        tracing::debug!("[enter] [start_adena] char_id={} amount={}", char_id, ctx.config.start_adena);
    }
    let burst = enter_burst(&w, &p, config.as_deref(), now);
    let icons = restored_buff_icons(&p);
    let (pname, map, x, y) = (p.name.clone(), p.map, p.x, p.y);
    if let Err(p) = w.add_player(p) {
        tracing::warn!("[enter] [already_in_world] session={} name={}", s.id, p.name);
        s.close(CloseReason::Kicked);
        return Ok(());
    }

    for pkt in burst {
        s.send(pkt);
    }
    view::refresh_view(&mut w, s.id);
    view::refresh_observers(&mut w, &[(map, x, y)], s.id);
    timed_map::reset_if_new_day(&mut w, s.id, timed_map::today());
    timed_map::on_enter_map(&mut w, s.id);
    for pkt in icons {
        s.send(pkt);
    }
    s.send(build_time(game_clock(now)));
    drop(w);

    s.bind_char(char_id, Some(pname.clone()));
    s.set_state(SessionState::InWorld);
    tracing::info!(
        "[enter] [world] session={} account={} name={} char_id={} map={} x={} y={}",
        s.id,
        account,
        pname,
        char_id,
        map,
        x,
        y
    );
    Ok(())
}

/// Take the session's player out of the world and save it. Returns false
/// when the session had no player.
pub async fn leave_world(ctx: &GameCtx, sid: u64) -> bool {
    trade::on_disconnect(ctx, sid).await;

    let snap = {
        let mut w = ctx.world.write().await;
        let Some(p) = w.player(sid) else {
            return false;
        };
        let (char_id, map, x, y) = (p.char_id, p.map, p.x, p.y);
        warehouse::close(&mut w, sid);
        party::leave(&mut w, sid);

        let mut spots = vec![(map, x, y)];
        for obj in w.companions_of(char_id) {
            if let Some(c) = w.remove_companion(obj) {
                spots.push((c.map, c.x, c.y));
            }
        }
        let Some(p) = w.remove_player(sid) else {
            return false;
        };
        let snap = PlayerSnapshot::capture(&p);
        view::refresh_observers(&mut w, &spots, sid);
        snap
    };

    let failed = save_snapshot(ctx.storage.as_ref(), &snap).await;
    tracing::info!(
        "[enter] [left] session={} name={} char_id={} failed_stores={}",
        sid,
        snap.character.name,
        snap.character.id,
        failed
    );
    true
}

/// Back to the select screen without dropping the connection.
pub async fn change_char(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    s.set_state(SessionState::ReturningToSelect);
    leave_world(&srv.ctx, s.id).await;
    s.bind_char(0, None);
    s.send(build_logout());
    s.set_state(SessionState::Authenticated);
    tracing::info!("[enter] [change_char] session={} account={}", s.id, s.account().unwrap_or_default());
    account::send_char_list(srv, s).await
}

pub async fn quit(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    leave_world(&srv.ctx, s.id).await;
    s.close(CloseReason::Quit);
    Ok(())
}

pub async fn restart(srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    let ctx = &srv.ctx;
    let mut w = ctx.world.write().await;
    if !combat::restart(&mut w, ctx.deps.scripting.as_ref(), s.id) {
        tracing::debug!("[enter] [restart_ignored] session={}", s.id);
    }
    Ok(())
}

pub async fn keep_alive(_srv: &GameServer, s: &Arc<Session>) -> HandlerResult {
    if s.state() == SessionState::InWorld {
        s.send(build_time(game_clock(chrono::Utc::now().timestamp())));
    }
    Ok(())
}

/// Stored layout of the client's hotkey and window config: the declared
/// length minus three as LE u32, then the raw data.
pub fn char_config_blob(len_field: i32, data: &[u8]) -> Option<Vec<u8>> {
    if data.is_empty() || data.len() > MAX_CHAR_CONFIG {
        return None;
    }
    let mut blob = Vec::with_capacity(4 + data.len());
    blob.extend_from_slice(&len_field.wrapping_sub(3).to_le_bytes());
    blob.extend_from_slice(data);
    Some(blob)
}

pub fn save_char_config(srv: &GameServer, s: &Arc<Session>, r: &mut Reader<'_>) -> HandlerResult {
    let len_field = r.d()?;
    let data = r.rest();
    let Some(char_id) = s.char_id() else {
        return Ok(());
    };
    let Some(blob) = char_config_blob(len_field, data) else {
        tracing::debug!("[enter] [config_rejected] session={} len={}", s.id, data.len());
        return Ok(());
    };
    if !srv.ctx.persist.submit(PersistJob::CharConfig { char_id, blob }) {
        tracing::warn!("[enter] [config_dropped] session={} char_id={}", s.id, char_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::game::test_support;
    use crate::network::opcodes::*;
    use crate::world::player::test_support::player;

    const MAPS: &str = r#"
maps:
  - { id: 4, start_x: 32000, end_x: 34000, start_y: 32000, end_y: 34000 }
"#;

    fn content() -> Content {
        Content::from_yaml("", "", "", MAPS).unwrap()
    }

    #[test]
    fn test_burst_order_without_clan() {
        let w = WorldState::new(Arc::new(content()));
        let (p, _rx) = player(1, 100, "Alice");
        let ops: Vec<u8> = enter_burst(&w, &p, None, 0).iter().map(|b| b[0]).collect();
        assert_eq!(
            ops,
            vec![
                S_ENTER_WORLD_CHECK,
                S_ADD_INVENTORY_BATCH,
                S_STATUS,
                S_WORLD,
                S_PUT_OBJECT,
                S_MAGIC_STATUS,
                S_WEATHER,
                S_SKILL_LIST,
                S_BOOKMARKS,
            ]
        );
    }

    #[test]
    fn test_burst_adds_config_and_clan() {
        let w = WorldState::new(Arc::new(content()));
        let (mut p, _rx) = player(1, 100, "Alice");
        p.clan_id = 7;
        p.clan_name = "Knights".into();
        let blob = char_config_blob(13, &[1; 10]).unwrap();
        let burst = enter_burst(&w, &p, Some(&blob), 0);
        let ops: Vec<u8> = burst.iter().map(|b| b[0]).collect();
        assert_eq!(&ops[9..], &[S_EVENT, S_CLAN_NAME, S_CLAN_ATTENTION]);
        assert_eq!(burst[9][1], EV_CHARACTER_CONFIG);
        // clan members carry their own char id in the login packet
        assert_eq!(&burst[0][2..6], &100i32.to_le_bytes());
    }

    #[test]
    fn test_config_blob_layout() {
        let blob = char_config_blob(20, &[9, 8, 7]).unwrap();
        assert_eq!(&blob[..4], &17u32.to_le_bytes());
        assert_eq!(&blob[4..], &[9, 8, 7]);
        assert!(char_config_blob(20, &[]).is_none());
        assert!(char_config_blob(20, &vec![0; MAX_CHAR_CONFIG + 1]).is_none());
        assert!(char_config_blob(20, &vec![0; MAX_CHAR_CONFIG]).is_some());
    }

    #[tokio::test]
    async fn test_leave_world_saves_and_removes() {
        let (ctx, mem, _rx) = test_support::ctx(content());
        let id = mem.seed_character(crate::persist::CharacterRow {
            account: "acct".into(),
            name: "Alice".into(),
            level: 1,
            hp: 10,
            map: 4,
            ..Default::default()
        });
        {
            let mut w = ctx.world.write().await;
            let (mut p, _rx) = player(1, id, "Alice");
            p.account = "acct".into();
            p.x = 32800;
            w.add_player(p).unwrap();
        }
        assert!(leave_world(&ctx, 1).await);
        assert!(ctx.world.read().await.player(1).is_none());
        let saved = mem.character_by_name("Alice").unwrap();
        assert_eq!(saved.x, 32800);
        assert!(!leave_world(&ctx, 1).await);
    }
}
