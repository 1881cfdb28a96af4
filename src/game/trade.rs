//! Player-to-player trade.
//!
//! Adding to the window moves the item out of the source inventory at
//! once and keeps a copy in the staging list. Cancel or disconnect puts
//! the copies back. A commit writes one WAL row per staged transfer
//! before either inventory is touched; a failed WAL write cancels the
//! trade on both sides. Once the windows close, both inventories and
//! the processed marks are stored together, and no other inventory save
//! for either side runs until that store returns.

use std::sync::Arc;

use super::item::{give_gold, give_item, send_weight, spend_gold, take_item};
use super::packets::*;
use super::{ask_yes_no, GameCtx};
use crate::game::types::{chebyshev, HEADING_DX, HEADING_DY};
use crate::network::opcodes::YN_TRADE;
use crate::persist::worker::PersistJob;
use crate::persist::snapshot::{inventory_save, next_save_seq, PlayerSnapshot};
use crate::persist::{with_deadline, InventorySave, TxType, WalRow, DB_DEADLINE};
use crate::world::player::TradeState;
use crate::world::WorldState;

/// Most entries one side may stage.
pub const MAX_STAGED: usize = 16;
/// Partners further apart than this lose the trade.
pub const TRADE_RANGE: i32 = 15;

pub const STATUS_COMPLETE: u8 = 0;
pub const STATUS_CANCELLED: u8 = 1;

/// The player standing on the tile `sid` faces, looking back.
fn face_to_face(w: &WorldState, sid: u64) -> Option<u64> {
    let p = w.player(sid)?;
    let h = (p.heading & 7) as usize;
    let (tx, ty) = (p.x + HEADING_DX[h], p.y + HEADING_DY[h]);
    let opposite = ((h + 4) % 8) as u8;
    w.nearby_players_within(p.map, p.x, p.y, 1, sid).into_iter().find(|&s| {
        w.player(s)
            .is_some_and(|o| o.x == tx && o.y == ty && o.heading == opposite && !o.dead)
    })
}

/// Ask the player in front of `sid` to trade.
pub fn request(w: &mut WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    if p.dead || p.trade.is_some() {
        return;
    }
    let (char_id, name) = (p.char_id, p.name.clone());
    let Some(target) = face_to_face(w, sid) else {
        w.send_to(sid, build_chat_line(9, "No one is facing you to trade."));
        return;
    };
    if let Some(t) = w.player(target).filter(|t| t.trade.is_some()) {
        let line = format!("{} is already trading.", t.name);
        w.send_to(sid, build_chat_line(9, &line));
        return;
    }
    ask_yes_no(w, target, YN_TRADE, char_id, &[&name]);
    tracing::debug!("[trade] [requested] session={} target={}", sid, target);
}

/// Answer to a trade request from `inviter_char`. Accepting opens both windows.
pub fn answer(w: &mut WorldState, sid: u64, inviter_char: i32, accepted: bool) {
    let Some(me) = w.player(sid) else {
        return;
    };
    let (my_char, my_name) = (me.char_id, me.name.clone());
    let Some(inviter) = w.session_of_char(inviter_char) else {
        return;
    };
    if !accepted {
        let line = format!("{} declined the trade.", my_name);
        w.send_to(inviter, build_chat_line(9, &line));
        return;
    }
    let ok = match (w.player(sid), w.player(inviter)) {
        (Some(a), Some(b)) => {
            a.trade.is_none()
                && b.trade.is_none()
                && a.map == b.map
                && chebyshev(a.x, a.y, b.x, b.y) <= TRADE_RANGE
        }
        _ => false,
    };
    if !ok {
        return;
    }
    let guard = Arc::new(tokio::sync::Mutex::new(()));
    let Some((a, b)) = w.player_pair_mut(sid, inviter) else {
        return;
    };
    a.trade = Some(TradeState::new(inviter, inviter_char, Arc::clone(&guard)));
    b.trade = Some(TradeState::new(sid, my_char, guard));
    a.session.send(build_trade_open(&b.name));
    b.session.send(build_trade_open(&a.name));
    tracing::info!("[trade] [opened] a={} b={}", inviter_char, my_char);
}

/// Stage an item (or gold when `obj_id` is 0) into the window.
pub fn add(w: &mut WorldState, sid: u64, obj_id: u32, count: i32) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(t) = p.trade.as_ref() else {
        return;
    };
    if t.committing {
        return;
    }
    let partner = t.partner_session;
    if w.player(partner).is_none() {
        cancel(w, sid);
        return;
    }
    reset_accept(w, sid);
    reset_accept(w, partner);

    if obj_id == 0 {
        add_gold(w, sid, partner, count);
        return;
    }

    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(item) = p.inventory.get(obj_id) else {
        return;
    };
    if item.equipped {
        return;
    }
    let template = w.content.items.get(item.item_id);
    if template.is_some_and(|t| !t.tradable) {
        w.send_to(sid, build_chat_line(9, "This item cannot be traded."));
        return;
    }
    let staged = p.trade.as_ref().map(|t| t.staged.len()).unwrap_or(MAX_STAGED);
    if staged >= MAX_STAGED {
        return;
    }
    let count = if count <= 0 { item.count } else { count.min(item.count) };

    let Some(copy) = take_item(w, sid, obj_id, count) else {
        return;
    };
    let t = w.content.items.get(copy.item_id);
    let name = item_view_name(&copy, t);
    let gfx = t.map(|t| t.inv_gfx).unwrap_or(0);
    let bless = copy.bless.wire();
    if let Some(tr) = w.player_mut(sid).and_then(|p| p.trade.as_mut()) {
        tr.staged.push(copy);
    }
    w.send_to(sid, build_trade_add(0, gfx, &name, bless));
    w.send_to(partner, build_trade_add(1, gfx, &name, bless));
}

fn add_gold(w: &mut WorldState, sid: u64, partner: u64, count: i32) {
    if count <= 0 {
        return;
    }
    // A new amount replaces the previous one.
    let previous = w.player(sid).and_then(|p| p.trade.as_ref()).map(|t| t.gold).unwrap_or(0);
    if previous > 0 {
        give_gold(w, sid, previous);
        if let Some(t) = w.player_mut(sid).and_then(|p| p.trade.as_mut()) {
            t.gold = 0;
        }
    }
    let (have, stack) = w.player(sid).map(|p| (p.inventory.gold(), p.inventory.gold_obj())).unwrap_or((0, None));
    let count = count.min(have);
    if count <= 0 || !spend_gold(w, sid, count) {
        return;
    }
    if let Some(t) = w.player_mut(sid).and_then(|p| p.trade.as_mut()) {
        t.gold = count;
        if let Some(obj) = stack {
            t.gold_obj = obj;
        }
    }
    send_weight(w, sid);
    let label = format!("Adena ({})", count);
    w.send_to(sid, build_trade_add(0, 0, &label, 1));
    w.send_to(partner, build_trade_add(1, 0, &label, 1));
}

fn reset_accept(w: &mut WorldState, sid: u64) {
    if let Some(t) = w.player_mut(sid).and_then(|p| p.trade.as_mut()) {
        t.accepted = false;
    }
}

/// Return staged copies and gold to their owner and close the window.
fn restore(w: &mut WorldState, sid: u64, notify: bool) {
    let Some(t) = w.player_mut(sid).and_then(|p| p.trade.take()) else {
        return;
    };
    for item in t.staged {
        give_item(w, sid, item);
    }
    give_gold(w, sid, t.gold);
    if notify {
        w.send_to(sid, build_trade_status(STATUS_CANCELLED));
    }
}

/// Cancel the trade on both sides.
pub fn cancel(w: &mut WorldState, sid: u64) {
    let Some(t) = w.player(sid).and_then(|p| p.trade.as_ref()) else {
        return;
    };
    if t.committing {
        return;
    }
    let partner = t.partner_session;
    restore(w, sid, true);
    let partner_linked = w
        .player(partner)
        .and_then(|p| p.trade.as_ref())
        .is_some_and(|t| t.partner_session == sid);
    if partner_linked {
        restore(w, partner, true);
    }
    tracing::debug!("[trade] [cancelled] session={} partner={}", sid, partner);
}

/// Drop the trade when the partners drifted apart. Called after movement.
pub fn cancel_if_apart(w: &mut WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(t) = p.trade.as_ref() else {
        return;
    };
    if t.committing {
        return;
    }
    let apart = match w.player(t.partner_session) {
        Some(o) => o.map != p.map || chebyshev(o.x, o.y, p.x, p.y) > TRADE_RANGE,
        None => true,
    };
    if apart {
        cancel(w, sid);
    }
}

/// Rows a commit writes: every staged entry on both sides, then non-zero gold.
fn wal_rows(w: &WorldState, a: u64, b: u64) -> Option<Vec<WalRow>> {
    let pa = w.player(a)?;
    let pb = w.player(b)?;
    let ta = pa.trade.as_ref()?;
    let tb = pb.trade.as_ref()?;
    let mut rows = Vec::new();
    for (from, to, t) in [(pa.char_id, pb.char_id, ta), (pb.char_id, pa.char_id, tb)] {
        for it in &t.staged {
            let obj = if it.stackable { 0 } else { it.obj_id };
            rows.push(WalRow::item(TxType::Trade, from, to, it.item_id, obj, it.count, it.enchant));
        }
    }
    for (from, to, t) in [(pa.char_id, pb.char_id, ta), (pb.char_id, pa.char_id, tb)] {
        if t.gold > 0 {
            rows.push(WalRow::gold(TxType::Trade, from, to, t.gold));
        }
    }
    Some(rows)
}

/// Confirm the window. The second confirmation commits the trade.
pub async fn accept(ctx: &GameCtx, sid: u64) {
    let (partner, guard, rows) = {
        let mut w = ctx.world.write().await;
        let Some(t) = w.player_mut(sid).and_then(|p| p.trade.as_mut()) else {
            return;
        };
        if t.committing {
            return;
        }
        t.accepted = true;
        let partner = t.partner_session;
        let guard = Arc::clone(&t.guard);
        let partner_ready = w
            .player(partner)
            .and_then(|p| p.trade.as_ref())
            .is_some_and(|t| t.partner_session == sid && t.accepted && !t.committing);
        if w.player(partner).is_none() {
            cancel(&mut w, sid);
            return;
        }
        if !partner_ready {
            return;
        }
        let Some(rows) = wal_rows(&w, sid, partner) else {
            return;
        };
        for s in [sid, partner] {
            if let Some(t) = w.player_mut(s).and_then(|p| p.trade.as_mut()) {
                t.committing = true;
            }
        }
        (partner, guard, rows)
    };

    let _held = guard.lock().await;
    let written = if rows.is_empty() {
        Ok(Vec::new())
    } else {
        with_deadline(DB_DEADLINE, ctx.storage.write_wal(&rows)).await
    };

    let (tx_ids, inventories) = {
        let mut w = ctx.world.write().await;
        match written {
            Ok(tx_ids) => {
                finish(&mut w, sid, partner);
                tracing::info!("[trade] [completed] a={} b={} rows={}", sid, partner, rows.len());
                if tx_ids.is_empty() {
                    submit_snapshots(ctx, &w, &[sid, partner]);
                    return;
                }
                // Same lock as the hand-over: no save may see the new
                // inventories before the settle does.
                let seq = next_save_seq();
                let mut inventories = Vec::with_capacity(2);
                for s in [sid, partner] {
                    if let Some(p) = w.player_mut(s) {
                        p.settling = Some(Arc::clone(&guard));
                        inventories.push(inventory_save(p.char_id, &p.inventory, seq));
                    }
                }
                (tx_ids, inventories)
            }
            Err(e) => {
                tracing::error!("[trade] [wal_failed] a={} b={} err={}", sid, partner, e);
                for s in [sid, partner] {
                    if let Some(t) = w.player_mut(s).and_then(|p| p.trade.as_mut()) {
                        t.committing = false;
                    }
                }
                restore(&mut w, sid, true);
                restore(&mut w, partner, true);
                return;
            }
        }
    };

    settle(ctx, sid, partner, &inventories, tx_ids).await;
}

/// Store both post-trade inventories and mark the WAL rows in one go.
/// Until it returns, snapshots of either side leave the inventory out.
async fn settle(ctx: &GameCtx, a: u64, b: u64, inventories: &[InventorySave], tx_ids: Vec<i64>) {
    let settled = with_deadline(DB_DEADLINE, ctx.storage.settle_transfer(inventories, &tx_ids)).await;

    let mut w = ctx.world.write().await;
    for s in [a, b] {
        if let Some(p) = w.player_mut(s) {
            p.settling = None;
        }
    }
    submit_snapshots(ctx, &w, &[a, b]);
    if let Err(e) = settled {
        // The queued snapshots carry the inventories; mark the rows after them.
        tracing::error!("[trade] [settle_failed] a={} b={} rows={} err={}", a, b, tx_ids.len(), e);
        ctx.persist.submit(PersistJob::WalProcessed(tx_ids));
    }
}

fn submit_snapshots(ctx: &GameCtx, w: &WorldState, sids: &[u64]) {
    for &s in sids {
        if let Some(p) = w.player(s) {
            ctx.persist.submit(PersistJob::Snapshot(Box::new(PlayerSnapshot::capture(p))));
        }
    }
}

/// Hand each side's staged entries to the other and close both windows.
fn finish(w: &mut WorldState, a: u64, b: u64) {
    let ta = w.player_mut(a).and_then(|p| p.trade.take());
    let tb = w.player_mut(b).and_then(|p| p.trade.take());
    for (to, t) in [(b, ta), (a, tb)] {
        let Some(t) = t else {
            continue;
        };
        for item in t.staged {
            give_item(w, to, item);
        }
        give_gold(w, to, t.gold);
    }
    w.send_to(a, build_trade_status(STATUS_COMPLETE));
    w.send_to(b, build_trade_status(STATUS_COMPLETE));
}

/// Session teardown: wait out any commit or settle in flight, then put
/// staged items back and cancel the partner's side.
pub async fn on_disconnect(ctx: &GameCtx, sid: u64) {
    let guard = {
        let w = ctx.world.read().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        match (p.trade.as_ref(), p.settling.as_ref()) {
            (Some(t), _) => Arc::clone(&t.guard),
            (None, Some(g)) => Arc::clone(g),
            (None, None) => return,
        }
    };
    let _held = guard.lock().await;
    let mut w = ctx.world.write().await;
    cancel(&mut w, sid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::world::inventory::InvItem;
    use crate::world::player::test_support::player;

    const ITEMS: &str = r#"
items:
  - { id: 40308, name: adena, stackable: true, weight: 0 }
  - { id: 20, name: sword }
  - { id: 30, name: quest token, tradable: false }
"#;

    pub(crate) fn facing_pair() -> WorldState {
        let mut w = WorldState::new(Arc::new(Content::from_yaml(ITEMS, "", "", "").unwrap()));
        let (mut a, _) = player(1, 100, "Alice");
        a.heading = 2;
        a.inventory.add(InvItem {
            obj_id: 1,
            item_id: 40308,
            count: 500,
            enchant: 0,
            bless: Default::default(),
            identified: true,
            equipped: false,
            stackable: true,
        });
        a.inventory.add(InvItem {
            obj_id: 2,
            item_id: 20,
            count: 1,
            enchant: 3,
            bless: Default::default(),
            identified: true,
            equipped: false,
            stackable: false,
        });
        let (mut b, _) = player(2, 101, "Bob");
        b.x += 1;
        b.heading = 6;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();
        w
    }

    fn open(w: &mut WorldState) {
        request(w, 1);
        assert_eq!(w.player(2).unwrap().pending.map(|p| p.kind), Some(YN_TRADE));
        answer(w, 2, 100, true);
        assert!(w.player(1).unwrap().trade.is_some());
        assert!(w.player(2).unwrap().trade.is_some());
    }

    #[test]
    fn test_request_needs_face_to_face() {
        let mut w = facing_pair();
        if let Some(b) = w.player_mut(2) {
            b.heading = 0;
        }
        request(&mut w, 1);
        assert!(w.player(2).unwrap().pending.is_none());
    }

    #[test]
    fn test_staging_moves_out_and_cancel_restores() {
        let mut w = facing_pair();
        open(&mut w);
        add(&mut w, 1, 2, 1);
        add(&mut w, 1, 0, 100);
        let a = w.player(1).unwrap();
        assert!(a.inventory.get(2).is_none());
        assert_eq!(a.inventory.gold(), 400);

        cancel(&mut w, 2);
        let a = w.player(1).unwrap();
        assert!(a.trade.is_none());
        assert_eq!(a.inventory.gold(), 500);
        assert_eq!(a.inventory.get(2).map(|i| i.enchant), Some(3));
        assert!(w.player(2).unwrap().trade.is_none());
    }

    #[test]
    fn test_changing_gold_replaces_amount() {
        let mut w = facing_pair();
        open(&mut w);
        add(&mut w, 1, 0, 100);
        add(&mut w, 1, 0, 300);
        let a = w.player(1).unwrap();
        assert_eq!(a.trade.as_ref().unwrap().gold, 300);
        assert_eq!(a.inventory.gold(), 200);
    }

    #[test]
    fn test_untradable_and_limit() {
        let mut w = facing_pair();
        if let Some(a) = w.player_mut(1) {
            a.inventory.add(InvItem {
                obj_id: 9,
                item_id: 30,
                count: 1,
                enchant: 0,
                bless: Default::default(),
                identified: true,
                equipped: false,
                stackable: false,
            });
        }
        open(&mut w);
        add(&mut w, 1, 9, 1);
        assert!(w.player(1).unwrap().inventory.get(9).is_some());
        assert!(w.player(1).unwrap().trade.as_ref().unwrap().staged.is_empty());
    }

    #[test]
    fn test_moving_apart_cancels() {
        let mut w = facing_pair();
        open(&mut w);
        add(&mut w, 1, 2, 1);
        w.update_position(2, 32768 + 30, 32768, 4, 0);
        cancel_if_apart(&mut w, 2);
        assert!(w.player(1).unwrap().trade.is_none());
        assert!(w.player(1).unwrap().inventory.get(2).is_some());
    }

    #[test]
    fn test_wal_rows_skip_zero_gold() {
        let mut w = facing_pair();
        open(&mut w);
        add(&mut w, 1, 2, 1);
        add(&mut w, 1, 0, 100);
        let rows = wal_rows(&w, 1, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].from_char, rows[0].to_char, rows[0].obj_id), (100, 101, 2));
        assert_eq!((rows[1].item_id, rows[1].gold), (0, 100));
    }

    fn bob_goods(w: &mut WorldState) {
        if let Some(b) = w.player_mut(2) {
            b.inventory.add(InvItem {
                obj_id: 5,
                item_id: 20,
                count: 1,
                enchant: 1,
                bless: Default::default(),
                identified: true,
                equipped: false,
                stackable: false,
            });
            b.inventory.add(crate::game::item::gold_item(6, 200));
        }
    }

    async fn trading_ctx() -> (GameCtx, Arc<crate::persist::memory::MemoryStorage>) {
        let (ctx, mem, _rx) = crate::game::test_support::ctx(Content::from_yaml(ITEMS, "", "", "").unwrap());
        {
            let mut w = ctx.world.write().await;
            *w = facing_pair();
            bob_goods(&mut w);
            open(&mut w);
        }
        (ctx, mem)
    }

    fn gold_of(rows: &[crate::persist::ItemRow]) -> i32 {
        rows.iter().filter(|r| r.item_id == 40308).map(|r| r.count).sum()
    }

    #[tokio::test]
    async fn test_two_way_trade_settles_both_inventories() {
        let (ctx, mem) = trading_ctx().await;
        {
            let mut w = ctx.world.write().await;
            add(&mut w, 1, 2, 1);
            add(&mut w, 1, 0, 100);
            add(&mut w, 2, 5, 1);
            add(&mut w, 2, 0, 50);
        }
        accept(&ctx, 1).await;
        assert!(mem.wal_rows().is_empty());
        accept(&ctx, 2).await;

        let rows = mem.wal_rows();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.processed));

        let w = ctx.world.read().await;
        let (a, b) = (w.player(1).unwrap(), w.player(2).unwrap());
        assert!(a.trade.is_none() && b.trade.is_none());
        assert!(a.settling.is_none() && b.settling.is_none());
        assert_eq!(a.inventory.gold(), 450);
        assert_eq!(b.inventory.gold(), 250);
        assert_eq!(a.inventory.get(5).map(|i| i.enchant), Some(1));
        assert_eq!(b.inventory.get(2).map(|i| i.enchant), Some(3));

        let stored_a = mem.inventory_of(100);
        let stored_b = mem.inventory_of(101);
        assert_eq!(gold_of(&stored_a), 450);
        assert_eq!(gold_of(&stored_b), 250);
        assert!(stored_a.iter().any(|r| r.obj_id == 5));
        assert!(stored_b.iter().any(|r| r.obj_id == 2));
    }

    #[tokio::test]
    async fn test_empty_confirm_writes_no_rows() {
        let (ctx, mem) = trading_ctx().await;
        accept(&ctx, 1).await;
        accept(&ctx, 2).await;
        assert!(mem.wal_rows().is_empty());
        let w = ctx.world.read().await;
        assert!(w.player(1).unwrap().trade.is_none());
        assert!(w.player(2).unwrap().trade.is_none());
        assert_eq!(w.player(1).unwrap().inventory.gold(), 500);
    }

    #[tokio::test]
    async fn test_wal_failure_restores_both_sides() {
        let (ctx, mem) = trading_ctx().await;
        mem.set_fail_wal(true);
        {
            let mut w = ctx.world.write().await;
            add(&mut w, 1, 2, 1);
            add(&mut w, 1, 0, 100);
            add(&mut w, 2, 5, 1);
            add(&mut w, 2, 0, 50);
        }
        accept(&ctx, 1).await;
        accept(&ctx, 2).await;

        assert!(mem.wal_rows().is_empty());
        let w = ctx.world.read().await;
        let (a, b) = (w.player(1).unwrap(), w.player(2).unwrap());
        assert!(a.trade.is_none() && b.trade.is_none());
        assert_eq!(a.inventory.gold(), 500);
        assert_eq!(b.inventory.gold(), 200);
        assert!(a.inventory.get(2).is_some() && a.inventory.get(5).is_none());
        assert!(b.inventory.get(5).is_some() && b.inventory.get(2).is_none());
    }

    #[tokio::test]
    async fn test_failed_settle_falls_back_to_queued_saves() {
        let (ctx, mem) = trading_ctx().await;
        mem.set_fail_settle(true);
        {
            let mut w = ctx.world.write().await;
            add(&mut w, 1, 2, 1);
        }
        accept(&ctx, 1).await;
        accept(&ctx, 2).await;

        for _ in 0..100 {
            if mem.wal_rows().iter().all(|r| r.processed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let rows = mem.wal_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].processed);
        assert!(mem.inventory_of(101).iter().any(|r| r.obj_id == 2));
        assert!(!mem.inventory_of(100).iter().any(|r| r.obj_id == 2));
        assert!(w_settled(&ctx).await);
    }

    async fn w_settled(ctx: &GameCtx) -> bool {
        let w = ctx.world.read().await;
        [1, 2].iter().all(|&s| w.player(s).is_some_and(|p| p.settling.is_none()))
    }
}
