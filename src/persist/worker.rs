//! Background persistence worker.
//!
//! Writes that are not on a confirmation path go through a bounded queue
//! drained by one task. Producers never wait: a full queue drops the job
//! and logs it.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::snapshot::{save_snapshot, PlayerSnapshot};
use super::*;

#[derive(Debug)]
pub enum PersistJob {
    Snapshot(Box<PlayerSnapshot>),
    CharConfig { char_id: i32, blob: Vec<u8> },
    WalProcessed(Vec<i64>),
    Online { account: String, online: bool },
}

impl PersistJob {
    fn kind(&self) -> &'static str {
        match self {
            PersistJob::Snapshot(_) => "snapshot",
            PersistJob::CharConfig { .. } => "char_config",
            PersistJob::WalProcessed(_) => "wal_processed",
            PersistJob::Online { .. } => "online",
        }
    }
}

/// Producer side of the worker queue.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistJob>,
}

impl PersistHandle {
    /// Queue a job. Returns false when it was dropped.
    pub fn submit(&self, job: PersistJob) -> bool {
        let kind = job.kind();
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("[persist] [queue_full] kind={}", kind);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("[persist] [queue_closed] kind={}", kind);
                false
            }
        }
    }
}

/// Create the queue and spawn its worker. The worker exits once every
/// handle is dropped and the queue is drained.
pub fn spawn_worker(storage: Arc<dyn Storage>, capacity: usize) -> (PersistHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_worker(storage, rx));
    (PersistHandle { tx }, task)
}

async fn run_worker(storage: Arc<dyn Storage>, mut rx: mpsc::Receiver<PersistJob>) {
    tracing::info!("[persist] [worker_started]");
    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Snapshot(snap) => {
                save_snapshot(storage.as_ref(), &snap).await;
            }
            PersistJob::CharConfig { char_id, blob } => {
                if let Err(e) = with_deadline(SAVE_DEADLINE, storage.save_char_config(char_id, &blob)).await {
                    tracing::error!("[persist] [char_config_failed] char_id={} err={}", char_id, e);
                }
            }
            PersistJob::WalProcessed(ids) => {
                if let Err(e) = with_deadline(DB_DEADLINE, storage.mark_wal_processed(&ids)).await {
                    tracing::error!("[persist] [wal_mark_failed] tx_ids={:?} err={}", ids, e);
                }
            }
            PersistJob::Online { account, online } => {
                if let Err(e) = with_deadline(DB_DEADLINE, storage.set_online(&account, online)).await {
                    tracing::error!("[persist] [online_failed] account={} err={}", account, e);
                }
            }
        }
    }
    tracing::info!("[persist] [worker_stopped]");
}

/// Settle WAL rows left by a previous run.
///
/// Rows pending at boot belong to commits whose inventories were never
/// stored, so the stored inventories still hold the staged goods on the
/// sender's side. Each row is applied and marked on its own. Returns the
/// number of rows examined.
pub async fn replay_wal(storage: &dyn Storage) -> Result<usize, StorageError> {
    let rows = with_deadline(DB_DEADLINE, storage.load_pending_wal()).await?;
    for r in &rows {
        let outcome = with_deadline(DB_DEADLINE, storage.replay_transfer(r)).await?;
        let (item_id, amount) = r.stack();
        match outcome {
            Replay::Skipped => tracing::warn!(
                "[persist] [wal_replay] tx_id={} from={} to={} item_id={} obj_id={} amount={} outcome=skipped",
                r.tx_id,
                r.from_char,
                r.to_char,
                item_id,
                r.obj_id,
                amount
            ),
            _ => tracing::info!(
                "[persist] [wal_replay] tx_id={} from={} to={} item_id={} obj_id={} amount={} outcome={:?}",
                r.tx_id,
                r.from_char,
                r.to_char,
                item_id,
                r.obj_id,
                amount,
                outcome
            ),
        }
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::memory::MemoryStorage;
    use crate::game::types::ADENA_ITEM_ID;

    #[tokio::test]
    async fn test_worker_writes_char_config() {
        let storage = Arc::new(MemoryStorage::new());
        let (handle, task) = spawn_worker(storage.clone(), 4);
        assert!(handle.submit(PersistJob::CharConfig { char_id: 3, blob: vec![1, 2, 3] }));
        drop(handle);
        task.await.unwrap();
        assert_eq!(storage.load_char_config(3).await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = PersistHandle { tx };
        assert!(handle.submit(PersistJob::WalProcessed(vec![1])));
        assert!(!handle.submit(PersistJob::WalProcessed(vec![2])));
    }

    fn sword(obj: u32, owner: i32) -> ItemRow {
        ItemRow { obj_id: obj, char_id: owner, item_id: 20, count: 1, enchant: 3, bless: 1, identified: true, equipped: false }
    }

    fn gold(obj: u32, owner: i32, count: i32) -> ItemRow {
        ItemRow { obj_id: obj, char_id: owner, item_id: ADENA_ITEM_ID, count, enchant: 0, bless: 1, identified: true, equipped: false }
    }

    fn gold_of(rows: &[ItemRow]) -> i32 {
        rows.iter().filter(|r| r.item_id == ADENA_ITEM_ID).map(|r| r.count).sum()
    }

    #[tokio::test]
    async fn test_replay_moves_items_and_gold_and_marks_rows() {
        let storage = MemoryStorage::new();
        storage.seed_items(1, vec![sword(900, 1), gold(901, 1, 500)]);
        storage
            .write_wal(&[WalRow::item(TxType::Trade, 1, 2, 20, 900, 1, 3), WalRow::gold(TxType::Trade, 1, 2, 100)])
            .await
            .unwrap();
        assert_eq!(replay_wal(&storage).await.unwrap(), 2);

        let to = storage.inventory_of(2);
        assert!(to.iter().any(|r| r.obj_id == 900));
        assert_eq!(gold_of(&to), 100);
        assert_eq!(gold_of(&storage.inventory_of(1)), 400);
        assert!(storage.load_pending_wal().await.unwrap().is_empty());
        assert_eq!(replay_wal(&storage).await.unwrap(), 0);
        assert_eq!(gold_of(&storage.inventory_of(1)), 400);
    }

    #[tokio::test]
    async fn test_crash_between_wal_and_settle_replays_cleanly() {
        use crate::persist::snapshot::{save_snapshot, PlayerSnapshot};
        use crate::world::inventory::InvItem;
        use crate::world::player::test_support::player;
        use crate::world::player::TradeState;

        let storage = MemoryStorage::new();
        let (mut alice, _rx) = player(1, 1, "Alice");
        alice.inventory.add(crate::game::item::gold_item(901, 400));
        let mut t = TradeState::new(2, 2, Default::default());
        t.staged.push(InvItem {
            obj_id: 900,
            item_id: 20,
            count: 1,
            enchant: 3,
            bless: Default::default(),
            identified: true,
            equipped: false,
            stackable: false,
        });
        t.gold = 100;
        t.gold_obj = 901;
        alice.trade = Some(t);

        // A save taken while the window is open keeps the staged goods home.
        assert_eq!(save_snapshot(&storage, &PlayerSnapshot::capture(&alice)).await, 0);
        assert_eq!(gold_of(&storage.inventory_of(1)), 500);
        assert!(storage.inventory_of(1).iter().any(|r| r.obj_id == 900));

        storage
            .write_wal(&[WalRow::item(TxType::Trade, 1, 2, 20, 900, 1, 3), WalRow::gold(TxType::Trade, 1, 2, 100)])
            .await
            .unwrap();

        // Saves during the commit leave the stored inventory alone.
        if let Some(t) = alice.trade.as_mut() {
            t.committing = true;
        }
        assert_eq!(save_snapshot(&storage, &PlayerSnapshot::capture(&alice)).await, 0);
        assert_eq!(gold_of(&storage.inventory_of(1)), 500);

        // The server dies here; boot replays the rows.
        assert_eq!(replay_wal(&storage).await.unwrap(), 2);
        let (from, to) = (storage.inventory_of(1), storage.inventory_of(2));
        assert_eq!(gold_of(&from), 400);
        assert_eq!(gold_of(&to), 100);
        assert!(to.iter().any(|r| r.obj_id == 900));
        assert!(!from.iter().any(|r| r.obj_id == 900));
    }
}
