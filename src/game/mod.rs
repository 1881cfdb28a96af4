//! Gameplay layer.
//!
//! Managers here are plain functions over `&mut WorldState` so they run
//! under whichever lock scope the caller already holds: a handler's write
//! lock or a tick phase. Operations that must reach storage mid-way (trade
//! commit, clan changes, warehouse) take the whole [`GameCtx`] and manage
//! the lock themselves.

pub mod bookmark;
pub mod chat;
pub mod clan;
pub mod combat;
pub mod item;
pub mod mob;
pub mod movement;
pub mod packets;
pub mod party;
pub mod pet;
pub mod scripting;
pub mod skill;
pub mod timed_map;
pub mod trade;
pub mod types;
pub mod view;
pub mod warehouse;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::persist::worker::PersistHandle;
use crate::persist::Storage;
use crate::tick::queue::ActionQueues;
use crate::world::player::PendingPrompt;
use crate::world::{SharedWorld, WorldState};
use scripting::StatScripting;

// ============================================
// Pluggable collaborators
// ============================================

/// Shops, dialogs and any NPC command the core does not route itself.
pub trait NpcService: Send + Sync {
    /// Returns true when the action was handled.
    fn npc_action(&self, w: &mut WorldState, session_id: u64, npc_obj: u32, action: &str) -> bool;
    /// First click on an NPC. Returns true when a dialog was sent.
    fn npc_talk(&self, w: &mut WorldState, session_id: u64, npc_obj: u32) -> bool;
    /// Buy or sell orders from a shop window: `(object or list index, count)`.
    fn shop_result(&self, _w: &mut WorldState, _session_id: u64, _npc_obj: u32, _result_type: u8, _orders: &[(u32, i32)]) -> bool {
        false
    }
}

pub trait SummonManager: Send + Sync {
    fn summon(&self, w: &mut WorldState, session_id: u64, choice: &str) -> bool;
}

pub trait PolymorphManager: Send + Sync {
    fn polymorph(&self, w: &mut WorldState, session_id: u64, form: &str) -> bool;
}

pub trait MailManager: Send + Sync {
    fn handle_mail(&self, w: &mut WorldState, session_id: u64, payload: &[u8]);
}

pub trait CraftManager: Send + Sync {
    fn craft(&self, w: &mut WorldState, session_id: u64, npc_obj: u32, recipe: &str) -> bool;
}

pub trait DollManager: Send + Sync {
    fn use_doll(&self, w: &mut WorldState, session_id: u64, item_obj: u32) -> bool;
}

/// Collaborators wired in after the core is up. Every empty slot is a
/// no-op at its call site.
#[derive(Clone)]
pub struct Deps {
    pub scripting: Arc<dyn StatScripting>,
    pub npc_service: Option<Arc<dyn NpcService>>,
    pub summon: Option<Arc<dyn SummonManager>>,
    pub polymorph: Option<Arc<dyn PolymorphManager>>,
    pub mail: Option<Arc<dyn MailManager>>,
    pub craft: Option<Arc<dyn CraftManager>>,
    pub doll: Option<Arc<dyn DollManager>>,
}

impl Deps {
    pub fn new(scripting: Arc<dyn StatScripting>) -> Self {
        Self { scripting, npc_service: None, summon: None, polymorph: None, mail: None, craft: None, doll: None }
    }

    /// Names of collaborators nobody provided.
    pub fn missing(&self) -> Vec<&'static str> {
        let slots = [
            ("npc_service", self.npc_service.is_none()),
            ("summon", self.summon.is_none()),
            ("polymorph", self.polymorph.is_none()),
            ("mail", self.mail.is_none()),
            ("craft", self.craft.is_none()),
            ("doll", self.doll.is_none()),
        ];
        slots.iter().filter(|(_, empty)| *empty).map(|(name, _)| *name).collect()
    }

    pub fn report_missing(&self) {
        for name in self.missing() {
            tracing::warn!("[game] [collaborator_missing] name={}", name);
        }
    }
}

impl Default for Deps {
    fn default() -> Self {
        Self::new(Arc::new(scripting::DefaultScripting))
    }
}

/// Everything a handler or tick phase needs, built once at startup.
#[derive(Clone)]
pub struct GameCtx {
    pub config: Arc<ServerConfig>,
    pub world: SharedWorld,
    pub storage: Arc<dyn Storage>,
    pub persist: PersistHandle,
    pub deps: Deps,
    pub queues: ActionQueues,
}

/// Raise a yes-no prompt on `target` and remember who asked.
///
/// A newer prompt replaces an unanswered one.
pub fn ask_yes_no(w: &mut WorldState, target: u64, kind: u16, from_char: i32, args: &[&str]) {
    let counter = w.next_yes_no();
    let Some(p) = w.player_mut(target) else {
        return;
    };
    p.pending = Some(PendingPrompt { kind, from_char });
    p.session.send(packets::build_yes_no(counter, kind, args));
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Shop;

    impl NpcService for Shop {
        fn npc_action(&self, _w: &mut WorldState, _s: u64, _n: u32, action: &str) -> bool {
            action == "buy"
        }

        fn npc_talk(&self, _w: &mut WorldState, _s: u64, _n: u32) -> bool {
            false
        }
    }

    #[test]
    fn test_missing_lists_empty_slots() {
        let mut deps = Deps::default();
        assert_eq!(deps.missing().len(), 6);
        deps.npc_service = Some(Arc::new(Shop));
        assert!(!deps.missing().contains(&"npc_service"));
        assert!(deps.missing().contains(&"mail"));
    }
}
