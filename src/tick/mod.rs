//! The world tick.
//!
//! One task owns the action queues and runs every gameplay phase in a fixed
//! order under a single write lock:
//!
//! 1. queued attacks, then queued skills
//! 2. buff decay
//! 3. HP and MP regeneration
//! 4. status countdowns (pink name, paralysis, sleep, stun, invisibility)
//! 5. timed-map quotas
//! 6. NPC behaviour
//! 7. ground-item expiry
//! 8. view flush for everything the phases marked dirty
//!
//! Snapshots for the periodic save are captured under the same lock and
//! handed to the persistence worker after it is released.

pub mod queue;

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::core::Shutdown;
use crate::game::packets::{build_hit_point, build_invis, build_mana_point, build_paralysis, build_pink_name};
use crate::game::scripting::StatScripting;
use crate::game::{combat, item, mob, skill, timed_map, view, GameCtx};
use crate::network::opcodes::PARALYSIS_REMOVE;
use crate::persist::snapshot::{save_snapshot, PlayerSnapshot};
use crate::persist::worker::PersistJob;
use crate::world::WorldState;
use queue::ActionReceivers;

/// HP regeneration is considered once per second.
pub const HP_REGEN_EVERY: u64 = 5;
/// MP regeneration period in ticks.
pub const MP_REGEN_EVERY: u64 = 80;
/// Below this much food nothing regenerates.
pub const MIN_REGEN_FOOD: i32 = 3;

/// What one tick did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub attacks: usize,
    pub skills: usize,
    pub buffs_ended: usize,
    pub expelled: usize,
    pub npcs_acted: usize,
    pub ground_expired: usize,
    pub views_flushed: usize,
}

pub struct TickEngine {
    ctx: GameCtx,
    receivers: ActionReceivers,
}

impl TickEngine {
    pub fn new(ctx: GameCtx, receivers: ActionReceivers) -> Self {
        Self { ctx, receivers }
    }

    /// Run every phase once against `w`.
    pub fn run_tick(&mut self, w: &mut WorldState, today: u32) -> TickReport {
        w.tick += 1;
        let script = self.ctx.deps.scripting.as_ref();
        let mut report = TickReport::default();

        for req in self.receivers.drain_attacks() {
            combat::resolve_attack(w, script, &req);
            report.attacks += 1;
        }
        for req in self.receivers.drain_skills() {
            skill::cast(w, script, &req);
            report.skills += 1;
        }
        report.buffs_ended = skill::tick_buffs(w);
        regenerate(w, script);
        tick_status(w);
        report.expelled = timed_map::tick(w, today);
        report.npcs_acted = mob::tick_npcs(w, script);
        report.ground_expired = item::tick_ground(w);
        report.views_flushed = view::flush_dirty(w);
        report
    }

    /// Tick until shutdown, then save every online player.
    pub async fn run(mut self, shutdown: Shutdown) {
        let period = self.ctx.config.tick_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let save_every = save_every_ticks(self.ctx.config.save_interval(), period);
        tracing::info!("[tick] [start] period_ms={} save_every_ticks={}", period.as_millis(), save_every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            let today = timed_map::today();
            let world = self.ctx.world.clone();
            let snaps = {
                let mut w = world.write().await;
                let report = self.run_tick(&mut w, today);
                if report.attacks + report.skills > 0 || report.expelled > 0 {
                    tracing::trace!("[tick] [report] tick={} {:?}", w.tick, report);
                }
                if w.tick % save_every == 0 {
                    capture_all(&w)
                } else {
                    Vec::new()
                }
            };
            let n = snaps.len();
            for snap in snaps {
                self.ctx.persist.submit(PersistJob::Snapshot(Box::new(snap)));
            }
            if n > 0 {
                tracing::debug!("[tick] [periodic_save] players={}", n);
            }
        }

        let failed = save_all(&self.ctx).await;
        tracing::info!("[tick] [stopped] failed_saves={}", failed);
    }
}

/// Ticks between periodic saves at the configured tick length.
fn save_every_ticks(save_interval: Duration, period: Duration) -> u64 {
    let period_ms = period.as_millis().max(1);
    ((save_interval.as_millis() / period_ms) as u64).max(1)
}

fn capture_all(w: &WorldState) -> Vec<PlayerSnapshot> {
    w.players().map(PlayerSnapshot::capture).collect()
}

/// Save every online player directly, bypassing the worker queue.
/// Returns the number of failed stores.
pub async fn save_all(ctx: &GameCtx) -> usize {
    let snaps = capture_all(&*ctx.world.read().await);
    let mut failed = 0;
    for snap in &snaps {
        failed += save_snapshot(ctx.storage.as_ref(), snap).await;
    }
    tracing::info!("[tick] [save_all] players={} failed={}", snaps.len(), failed);
    failed
}

fn regenerate(w: &mut WorldState, script: &dyn StatScripting) {
    let hp_phase = w.tick % HP_REGEN_EVERY == 0;
    let mp_phase = w.tick % MP_REGEN_EVERY == 0;
    if !hp_phase && !mp_phase {
        return;
    }
    let mut hp_changed = Vec::new();
    for p in w.players_mut() {
        if p.dead || p.food < MIN_REGEN_FOOD {
            p.regen.hp_ticks = 0;
            continue;
        }
        if hp_phase && p.hp < p.stats.max_hp {
            p.regen.hp_ticks += 1;
            if p.regen.hp_ticks >= script.hp_regen_interval(p.level) {
                p.regen.hp_ticks = 0;
                p.hp = (p.hp + script.hp_regen(p.level, p.stats.con).max(0)).min(p.stats.max_hp);
                p.session.send(build_hit_point(p.hp, p.stats.max_hp));
                hp_changed.push(p.session_id);
            }
        }
        if mp_phase && p.mp < p.stats.max_mp {
            p.mp = (p.mp + script.mp_regen(p.stats.wis).max(0)).min(p.stats.max_mp);
            p.session.send(build_mana_point(p.mp, p.stats.max_mp));
        }
    }
    for sid in hp_changed {
        crate::game::party::broadcast_hp(w, sid);
    }
}

/// Count every status timer down by one tick and announce the ones that ran out.
fn tick_status(w: &mut WorldState) {
    let mut pink_ended = Vec::new();
    let mut unparalysed = Vec::new();
    let mut visible_again = Vec::new();
    for p in w.players_mut() {
        let t = &mut p.timers;
        if t.pink_name == 1 {
            pink_ended.push(p.session_id);
        }
        if (t.paralysis == 1 && t.stun <= 1) || (t.stun == 1 && t.paralysis <= 1) {
            unparalysed.push(p.session_id);
        }
        if t.invis == 1 {
            visible_again.push(p.session_id);
        }
        t.pink_name = t.pink_name.saturating_sub(1);
        t.paralysis = t.paralysis.saturating_sub(1);
        t.sleep = t.sleep.saturating_sub(1);
        t.stun = t.stun.saturating_sub(1);
        t.invis = t.invis.saturating_sub(1);
    }

    for sid in pink_ended {
        if let Some(p) = w.player(sid) {
            w.broadcast_with_self(sid, &build_pink_name(p.object_id(), 0));
        }
    }
    for sid in unparalysed {
        w.send_to(sid, build_paralysis(PARALYSIS_REMOVE));
    }
    for sid in visible_again {
        let Some(p) = w.player(sid) else {
            continue;
        };
        if p.is_invisible() {
            continue;
        }
        let (obj, map, x, y) = (p.object_id(), p.map, p.x, p.y);
        p.session.send(build_invis(obj, false));
        w.mark_dirty_near(map, x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Content;
    use crate::game::test_support::ctx;
    use crate::network::opcodes::*;
    use crate::world::player::test_support::player;
    use queue::AttackRequest;

    #[test]
    fn test_save_every_ticks() {
        assert_eq!(save_every_ticks(Duration::from_secs(30), Duration::from_millis(200)), 150);
        assert_eq!(save_every_ticks(Duration::from_millis(50), Duration::from_millis(200)), 1);
    }

    const NPCS: &str = r#"
npcs:
  - { id: 45001, name: goblin, gfx: 145, hp: 20, exp: 50 }
"#;

    #[tokio::test]
    async fn test_regen_needs_food() {
        let (c, _mem, rx) = ctx(Content::default());
        let mut engine = TickEngine::new(c.clone(), rx);
        let mut w = c.world.write().await;
        let (mut a, _ra) = player(1, 100, "Alice");
        a.hp = 50;
        a.mp = 10;
        a.food = 40;
        let (mut b, _rb) = player(2, 101, "Bob");
        b.x += 3;
        b.hp = 50;
        b.food = 2;
        w.add_player(a).unwrap();
        w.add_player(b).unwrap();

        for _ in 0..MP_REGEN_EVERY {
            engine.run_tick(&mut w, 1);
        }
        assert!(w.player(1).unwrap().hp > 50);
        assert!(w.player(1).unwrap().mp > 10);
        assert_eq!(w.player(2).unwrap().hp, 50);
    }

    #[tokio::test]
    async fn test_pink_name_expires_with_broadcast() {
        let (c, _mem, rx) = ctx(Content::default());
        let mut engine = TickEngine::new(c.clone(), rx);
        let mut w = c.world.write().await;
        let (mut a, mut ra) = player(1, 100, "Alice");
        a.timers.pink_name = 2;
        a.timers.paralysis = 1;
        w.add_player(a).unwrap();

        engine.run_tick(&mut w, 1);
        assert_eq!(w.player(1).unwrap().timers.pink_name, 1);
        assert!(!w.player(1).unwrap().is_paralyzed());
        let first: Vec<u8> = std::iter::from_fn(|| ra.try_recv().ok()).map(|p| p[0]).collect();
        assert!(first.contains(&S_PARALYSIS));
        assert!(!first.contains(&S_PINK_NAME));

        engine.run_tick(&mut w, 1);
        let second: Vec<u8> = std::iter::from_fn(|| ra.try_recv().ok()).map(|p| p[0]).collect();
        assert!(second.contains(&S_PINK_NAME));
    }

    #[tokio::test]
    async fn test_queued_attack_resolves_on_tick() {
        let (c, _mem, rx) = ctx(Content::from_yaml("", NPCS, "", "").unwrap());
        let mut engine = TickEngine::new(c.clone(), rx);
        {
            let mut w = c.world.write().await;
            let (a, _ra) = player(1, 100, "Alice");
            w.add_player(a).unwrap();
            let t = w.content.npcs.get(45001).unwrap().clone();
            let sp = crate::database::mob_db::SpawnPoint { npc: 45001, map: 4, x: 32769, y: 32768, heading: 0, count: 1, respawn_secs: 10 };
            w.add_npc(crate::world::entities::Npc::spawn(9, &t, &sp));
        }
        assert!(c.queues.push_attack(AttackRequest { session_id: 1, target: 9, ranged: false, x: 0, y: 0 }));
        let mut w = c.world.write().await;
        let report = engine.run_tick(&mut w, 1);
        assert_eq!(report.attacks, 1);
        assert_eq!(w.tick, 1);
        assert_eq!(w.npcs[&9].target, Some(1));
    }

    #[tokio::test]
    async fn test_save_all_writes_every_player() {
        let (c, mem, _rx) = ctx(Content::default());
        let id = mem.seed_character(crate::persist::CharacterRow {
            name: "Alice".into(),
            account: "alice".into(),
            ..Default::default()
        });
        {
            let mut w = c.world.write().await;
            let (mut a, _ra) = player(1, id, "Alice");
            a.level = 33;
            w.add_player(a).unwrap();
        }
        assert_eq!(save_all(&c).await, 0);
        assert_eq!(mem.character_by_name("Alice").unwrap().level, 33);
    }
}
