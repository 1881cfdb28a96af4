//! Daily time quotas for dungeon groups.
//!
//! Time spent anywhere in a group counts against the group's quota. The
//! client shows a countdown refreshed once a minute; at zero the player is
//! moved to the group's exit. Usage resets when the day of year changes.

use chrono::Datelike;

use super::packets::{build_map_time_list, build_map_timer};
use super::{trade, view};
use crate::core::TICKS_PER_SECOND;
use crate::world::WorldState;

/// Countdown refresh period in seconds.
pub const TIMER_REFRESH_SECS: i32 = 60;

/// Start (or stop) the countdown for the map the player now stands on.
pub fn on_enter_map(w: &mut WorldState, sid: u64) {
    let content = std::sync::Arc::clone(&w.content);
    let Some(p) = w.player_mut(sid) else {
        return;
    };
    let Some(g) = content.maps.timed_group(p.map) else {
        p.timed_group = 0;
        p.timed_remaining = 0;
        return;
    };
    let used = p.map_time_used.get(&g.id).copied().unwrap_or(0);
    let remaining = (g.max_secs - used).max(0);
    p.timed_group = g.id;
    p.timed_remaining = remaining;
    p.session.send(build_map_timer(remaining));
    tracing::debug!("[timed_map] [enter] session={} group={} remaining={}", sid, g.id, remaining);
}

/// Remaining minutes for every group, as shown by the client's map-time window.
pub fn send_time_list(w: &WorldState, sid: u64) {
    let Some(p) = w.player(sid) else {
        return;
    };
    let used = |id: i32| p.map_time_used.get(&id).copied().unwrap_or(0);
    p.session.send(build_map_time_list(w.content.maps.timed_groups(), used));
}

/// Day of year the quotas are counted against.
pub fn today() -> u32 {
    chrono::Local::now().ordinal()
}

/// Forget usage recorded on another day. Runs on entering the world as
/// well as every tick, so a character saved on an earlier day never shows
/// yesterday's countdown.
pub fn reset_if_new_day(w: &mut WorldState, sid: u64, today: u32) -> bool {
    let Some(p) = w.player_mut(sid) else {
        return false;
    };
    if p.map_timer_day == today {
        return false;
    }
    let stale = p.map_timer_day != 0;
    p.map_timer_day = today;
    p.map_time_used.clear();
    if stale {
        tracing::info!("[timed_map] [daily_reset] session={} day={}", sid, today);
    }
    stale
}

/// Advance every timed-map countdown. Called each tick; the quota itself
/// moves once per second. Returns the number of players sent to an exit.
pub fn tick(w: &mut WorldState, today: u32) -> usize {
    let sids = w.session_ids();
    for &sid in &sids {
        if reset_if_new_day(w, sid, today) {
            on_enter_map(w, sid);
        }
    }
    if w.tick % TICKS_PER_SECOND != 0 {
        return 0;
    }

    let mut expired = Vec::new();
    for sid in sids {
        let Some(p) = w.player_mut(sid) else {
            continue;
        };
        if p.timed_group == 0 || p.dead {
            continue;
        }
        *p.map_time_used.entry(p.timed_group).or_insert(0) += 1;
        p.timed_remaining -= 1;
        if p.timed_remaining <= 0 {
            expired.push(sid);
        } else if p.timed_remaining % TIMER_REFRESH_SECS == 0 {
            p.session.send(build_map_timer(p.timed_remaining));
        }
    }

    let n = expired.len();
    for sid in expired {
        expel(w, sid);
    }
    n
}

fn expel(w: &mut WorldState, sid: u64) {
    let content = std::sync::Arc::clone(&w.content);
    let Some(map) = w.player(sid).map(|p| p.map) else {
        return;
    };
    let Some(g) = content.maps.timed_group(map) else {
        if let Some(p) = w.player_mut(sid) {
            p.timed_group = 0;
        }
        return;
    };
    let (x, y, map, heading, group) = (g.exit_x, g.exit_y, g.exit_map, g.exit_heading, g.id);
    trade::cancel(w, sid);
    view::teleport_player(w, sid, x, y, map, heading);
    tracing::info!("[timed_map] [expired] session={} group={}", sid, group);
}
