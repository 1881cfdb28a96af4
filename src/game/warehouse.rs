//! Personal (account-wide) warehouse.
//!
//! Opening the window loads the account's rows and hands the client a
//! transient id per row; the real row ids never leave the server. Deposits
//! take the items out of the inventory before the storage write and give
//! them back if it fails. Withdrawals write first and only then create the
//! inventory entry.

use std::collections::HashMap;

use super::item::{give_item, send_weight, spend_gold, take_item};
use super::packets::*;
use super::GameCtx;
use crate::game::types::Bless;
use crate::persist::{with_deadline, WarehouseRow, DB_DEADLINE};
use crate::world::inventory::InvItem;
use crate::world::player::WarehouseView;
use crate::world::WorldState;

/// Withdrawal fee, charged once per operation.
pub const WAREHOUSE_FEE: i32 = 30;
/// List type byte of the personal warehouse.
pub const LIST_PERSONAL: u8 = 3;
/// Result types of the buy/sell packet that belong to the warehouse.
pub const RESULT_DEPOSIT: u8 = 2;
pub const RESULT_WITHDRAW: u8 = 3;
/// Most entries one packet may move.
pub const MAX_ORDERS: usize = 100;

const MSG_INVENTORY_FULL: u16 = 263;
const MSG_NO_GOLD: u16 = 189;

/// Close the window and return its transient ids.
pub fn close(w: &mut WorldState, sid: u64) {
    let Some(view) = w.player_mut(sid).and_then(|p| p.warehouse.take()) else {
        return;
    };
    w.ids.release_temp(view.rows.into_keys());
}

fn send_list(w: &WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let Some(view) = p.warehouse.as_ref() else {
        return;
    };
    let mut ids: Vec<&u32> = view.rows.keys().collect();
    ids.sort();
    let rows: Vec<RetrieveRow<'_>> = ids
        .into_iter()
        .filter_map(|id| view.rows.get(id).map(|r| (*id, r)))
        .map(|(temp_id, r)| RetrieveRow {
            temp_id,
            template: w.content.items.get(r.item_id),
            count: r.count,
            enchant: r.enchant,
            bless: r.bless,
        })
        .collect();
    p.session.send(build_retrieve_list(view.npc_obj, LIST_PERSONAL, &rows, WAREHOUSE_FEE));
}

/// Load the account's rows and show them.
pub async fn open(ctx: &GameCtx, sid: u64, npc_obj: u32) {
    let account = match ctx.world.read().await.player(sid) {
        Some(p) => p.account.clone(),
        None => return,
    };
    let rows = match with_deadline(DB_DEADLINE, ctx.storage.load_warehouse(&account)).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("[warehouse] [load_failed] account={} err={}", account, e);
            return;
        }
    };

    let mut w = ctx.world.write().await;
    close(&mut w, sid);
    let view = WarehouseView { npc_obj, rows: rows.into_iter().map(|r| (w.ids.next_temp(), r)).collect() };
    let n = view.rows.len();
    match w.player_mut(sid) {
        Some(p) => p.warehouse = Some(view),
        None => {
            w.ids.release_temp(view.rows.into_keys());
            return;
        }
    }
    send_list(&w, sid);
    tracing::debug!("[warehouse] [opened] session={} rows={}", sid, n);
}

/// Dispatch a warehouse result from the buy/sell packet. An empty order
/// list closes the window.
pub async fn handle_result(ctx: &GameCtx, sid: u64, result_type: u8, orders: &[(u32, i32)]) {
    if orders.is_empty() {
        close(&mut *ctx.world.write().await, sid);
        return;
    }
    let orders = &orders[..orders.len().min(MAX_ORDERS)];
    match result_type {
        RESULT_DEPOSIT => deposit(ctx, sid, orders).await,
        RESULT_WITHDRAW => withdraw(ctx, sid, orders).await,
        _ => {}
    }
}

/// Move inventory entries into storage.
pub async fn deposit(ctx: &GameCtx, sid: u64, orders: &[(u32, i32)]) {
    let (account, staged) = {
        let mut w = ctx.world.write().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        if p.warehouse.is_none() || p.trade.is_some() || p.dead {
            return;
        }
        let account = p.account.clone();
        let mut staged = Vec::with_capacity(orders.len());
        for &(obj, count) in orders {
            let movable = w.player(sid).and_then(|p| p.inventory.get(obj)).is_some_and(|i| !i.equipped);
            if !movable {
                continue;
            }
            if let Some(item) = take_item(&mut w, sid, obj, count.max(1)) {
                staged.push(item);
            }
        }
        (account, staged)
    };
    if staged.is_empty() {
        return;
    }

    let mut stored = Vec::with_capacity(staged.len());
    let mut failed = Vec::new();
    for item in staged {
        let row = WarehouseRow {
            id: 0,
            account: account.clone(),
            item_id: item.item_id,
            count: item.count,
            enchant: item.enchant,
            bless: item.bless.wire(),
        };
        match with_deadline(DB_DEADLINE, ctx.storage.warehouse_deposit(&row)).await {
            Ok(id) => stored.push(WarehouseRow { id, ..row }),
            Err(e) => {
                tracing::error!("[warehouse] [deposit_failed] account={} item={} err={}", account, item.item_id, e);
                failed.push(item);
            }
        }
    }

    let mut w = ctx.world.write().await;
    for item in failed {
        give_item(&mut w, sid, item);
    }
    let n = stored.len();
    let temp: Vec<(u32, WarehouseRow)> = stored.into_iter().map(|r| (w.ids.next_temp(), r)).collect();
    match w.player_mut(sid).and_then(|p| p.warehouse.as_mut()) {
        Some(view) => view.rows.extend(temp),
        None => w.ids.release_temp(temp.into_iter().map(|(id, _)| id)),
    }
    send_weight(&w, sid);
    tracing::debug!("[warehouse] [deposited] session={} rows={}", sid, n);
}

/// Move stored rows into the inventory. The fee is charged once when at
/// least one row came out.
pub async fn withdraw(ctx: &GameCtx, sid: u64, orders: &[(u32, i32)]) {
    let picks: Vec<(u32, WarehouseRow, i32)> = {
        let w = ctx.world.read().await;
        let Some(p) = w.player(sid) else {
            return;
        };
        let Some(view) = p.warehouse.as_ref() else {
            return;
        };
        if p.inventory.gold() < WAREHOUSE_FEE {
            p.session.send(build_message_code(MSG_NO_GOLD, &[]));
            return;
        }
        let mut seen = HashMap::new();
        let mut free = crate::world::inventory::MAX_INVENTORY.saturating_sub(p.inventory.len());
        let mut picks = Vec::new();
        for &(temp, count) in orders {
            let Some(row) = view.rows.get(&temp) else {
                continue;
            };
            if seen.insert(temp, ()).is_some() {
                continue;
            }
            let stackable = w.content.items.get(row.item_id).is_some_and(|t| t.is_stackable());
            let merges = stackable && p.inventory.find_stack(row.item_id).is_some();
            if !merges {
                if free == 0 {
                    p.session.send(build_message_code(MSG_INVENTORY_FULL, &[]));
                    break;
                }
                free -= 1;
            }
            picks.push((temp, row.clone(), count.clamp(1, row.count.max(1))));
        }
        picks
    };
    if picks.is_empty() {
        return;
    }

    let mut moved = Vec::with_capacity(picks.len());
    for (temp, row, count) in picks {
        match with_deadline(DB_DEADLINE, ctx.storage.warehouse_withdraw(row.id, count)).await {
            Ok(()) => moved.push((temp, row, count)),
            Err(e) => tracing::error!("[warehouse] [withdraw_failed] row={} err={}", row.id, e),
        }
    }
    if moved.is_empty() {
        return;
    }

    let mut w = ctx.world.write().await;
    let mut released = Vec::new();
    for (temp, row, count) in &moved {
        let obj_id = w.ids.next_object();
        let item = match w.content.items.get(row.item_id) {
            Some(t) => InvItem {
                enchant: row.enchant,
                bless: Bless::from_wire(row.bless),
                ..InvItem::new(obj_id, t, *count)
            },
            None => InvItem {
                obj_id,
                item_id: row.item_id,
                count: *count,
                enchant: row.enchant,
                bless: Bless::from_wire(row.bless),
                identified: true,
                equipped: false,
                stackable: false,
            },
        };
        give_item(&mut w, sid, item);
        if let Some(view) = w.player_mut(sid).and_then(|p| p.warehouse.as_mut()) {
            let emptied = match view.rows.get_mut(temp) {
                Some(r) if r.count > *count => {
                    r.count -= count;
                    false
                }
                _ => true,
            };
            if emptied {
                view.rows.remove(temp);
                released.push(*temp);
            }
        }
    }
    w.ids.release_temp(released);
    if !spend_gold(&mut w, sid, WAREHOUSE_FEE) {
        tracing::warn!("[warehouse] [fee_short] session={}", sid);
    }
    send_weight(&w, sid);
    tracing::debug!("[warehouse] [withdrew] session={} rows={}", sid, moved.len());
}
