//! Deferred-action queues.
//!
//! Handlers parse attack and skill packets and push a small record; the
//! tick drains the queues in FIFO order during its ingest phase. Producers
//! never wait: a full queue drops the request.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackRequest {
    pub session_id: u64,
    pub target: u32,
    pub ranged: bool,
    /// Tile the client aimed at
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillRequest {
    pub session_id: u64,
    pub skill_id: i32,
    /// Target object, or a bookmark id for teleport spells (0 = none)
    pub target: u32,
    pub x: i32,
    pub y: i32,
}

/// Producer side, cloned into every connection task.
#[derive(Clone)]
pub struct ActionQueues {
    attack: mpsc::Sender<AttackRequest>,
    skill: mpsc::Sender<SkillRequest>,
}

/// Consumer side, owned by the tick engine.
pub struct ActionReceivers {
    pub attack: mpsc::Receiver<AttackRequest>,
    pub skill: mpsc::Receiver<SkillRequest>,
}

pub fn action_queues(attack_cap: usize, skill_cap: usize) -> (ActionQueues, ActionReceivers) {
    let (atx, arx) = mpsc::channel(attack_cap.max(1));
    let (stx, srx) = mpsc::channel(skill_cap.max(1));
    (ActionQueues { attack: atx, skill: stx }, ActionReceivers { attack: arx, skill: srx })
}

fn offer<T>(tx: &mpsc::Sender<T>, item: T, kind: &str, session_id: u64) -> bool {
    match tx.try_send(item) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("[tick] [queue_full] kind={} session={}", kind, session_id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("[tick] [queue_closed] kind={} session={}", kind, session_id);
            false
        }
    }
}

impl ActionQueues {
    pub fn push_attack(&self, req: AttackRequest) -> bool {
        offer(&self.attack, req, "attack", req.session_id)
    }

    pub fn push_skill(&self, req: SkillRequest) -> bool {
        offer(&self.skill, req, "skill", req.session_id)
    }
}

impl ActionReceivers {
    /// Everything queued right now, oldest first.
    pub fn drain_attacks(&mut self) -> Vec<AttackRequest> {
        drain(&mut self.attack)
    }

    pub fn drain_skills(&mut self) -> Vec<SkillRequest> {
        drain(&mut self.skill)
    }
}

fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(v) = rx.try_recv() {
        out.push(v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attack(session_id: u64) -> AttackRequest {
        AttackRequest { session_id, target: 7, ranged: false, x: 0, y: 0 }
    }

    #[test]
    fn test_fifo_and_drop_on_full() {
        let (q, mut rx) = action_queues(2, 1);
        assert!(q.push_attack(attack(1)));
        assert!(q.push_attack(attack(2)));
        assert!(!q.push_attack(attack(3)));
        let got: Vec<u64> = rx.drain_attacks().iter().map(|a| a.session_id).collect();
        assert_eq!(got, vec![1, 2]);
        assert!(rx.drain_attacks().is_empty());
    }

    #[test]
    fn test_closed_queue_refuses() {
        let (q, rx) = action_queues(1, 1);
        drop(rx);
        assert!(!q.push_skill(SkillRequest { session_id: 1, skill_id: 1, target: 0, x: 0, y: 0 }));
    }
}
