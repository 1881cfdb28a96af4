//! Persistence bridge.
//!
//! The core talks to durable storage only through [`Storage`]. Two
//! implementations ship: [`mysql::MySqlStorage`] for production and
//! [`memory::MemoryStorage`] for tests and offline runs. Every call made
//! from the game goes through [`with_deadline`].

pub mod memory;
pub mod mysql;
pub mod snapshot;
pub mod worker;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game::types::{StatDelta, ADENA_ITEM_ID};
use crate::world::player::{Bookmark, BuffFlags};

/// Default deadline for storage calls on a request path.
pub const DB_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for each store of a snapshot save.
pub const SAVE_DEADLINE: Duration = Duration::from_secs(3);

pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Error types for persistence
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Run a storage call under a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(r) => r,
        Err(_) => Err(StorageError::Timeout(deadline)),
    }
}

// ============================================
// Rows
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub name: String,
    pub password_hash: String,
    pub access_level: i32,
    pub online: bool,
    pub banned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharacterRow {
    pub id: i32,
    pub account: String,
    pub name: String,
    pub class_type: i32,
    pub class_gfx: i32,
    pub sex: i32,
    pub level: i32,
    pub exp: i32,
    pub hp: i32,
    pub mp: i32,
    /// Base stats: no equipment, no buffs
    pub base: StatDelta,
    pub lawful: i32,
    pub x: i32,
    pub y: i32,
    pub map: i32,
    pub heading: i32,
    pub food: i32,
    pub title: String,
    pub clan_id: i32,
    pub clan_name: String,
    pub clan_rank: i32,
    pub pk_count: i32,
    pub karma: i32,
    pub bonus_stats: i32,
    pub elixir_stats: i32,
    pub birthday: i32,
    /// Unix seconds at which a delayed delete becomes final
    pub delete_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub obj_id: u32,
    pub char_id: i32,
    pub item_id: i32,
    pub count: i32,
    pub enchant: i32,
    pub bless: u8,
    pub identified: bool,
    pub equipped: bool,
}

/// A character's whole inventory as of `seq`. Storage keeps the save with
/// the highest `seq` and ignores older ones that arrive late.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySave {
    pub char_id: i32,
    pub seq: u64,
    pub items: Vec<ItemRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffRow {
    pub skill_id: i32,
    pub remaining_secs: i32,
    pub delta: StatDelta,
    #[serde(default)]
    pub flags: BuffFlags,
    #[serde(default)]
    pub icon: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseRow {
    pub id: i64,
    pub account: String,
    pub item_id: i32,
    pub count: i32,
    pub enchant: i32,
    pub bless: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClanRow {
    pub id: i32,
    pub name: String,
    pub leader_id: i32,
    pub leader_name: String,
    pub found_date: i32,
    pub has_castle: bool,
    pub has_house: bool,
    pub announcement: Vec<u8>,
    pub emblem_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClanMemberRow {
    pub clan_id: i32,
    pub char_id: i32,
    pub name: String,
    pub rank: i32,
    pub notes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Trade,
}

impl TxType {
    pub fn as_i32(self) -> i32 {
        match self {
            TxType::Trade => 1,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(TxType::Trade),
            _ => None,
        }
    }
}

/// One intended value transfer, written before memory is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRow {
    /// Assigned by storage
    pub tx_id: i64,
    pub tx_type: TxType,
    pub from_char: i32,
    pub to_char: i32,
    /// 0 for a gold-only row
    pub item_id: i32,
    pub obj_id: u32,
    pub count: i32,
    pub enchant: i32,
    pub gold: i32,
    pub processed: bool,
}

impl WalRow {
    pub fn item(tx_type: TxType, from_char: i32, to_char: i32, item_id: i32, obj_id: u32, count: i32, enchant: i32) -> Self {
        Self { tx_id: 0, tx_type, from_char, to_char, item_id, obj_id, count, enchant, gold: 0, processed: false }
    }

    pub fn gold(tx_type: TxType, from_char: i32, to_char: i32, gold: i32) -> Self {
        Self { tx_id: 0, tx_type, from_char, to_char, item_id: 0, obj_id: 0, count: 0, enchant: 0, gold, processed: false }
    }

    /// Item id and amount moved by a row without an object id.
    pub fn stack(&self) -> (i32, i32) {
        if self.item_id == 0 {
            (ADENA_ITEM_ID, self.gold)
        } else {
            (self.item_id, self.count)
        }
    }
}

/// What replaying one WAL row did to the stored inventories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    Applied,
    /// The receiver already holds the item
    AlreadyApplied,
    /// The sender's stored state does not hold what the row moves
    Skipped,
}

// ============================================
// Storage interface
// ============================================

/// Durable storage consumed by the core.
pub trait Storage: Send + Sync {
    // accounts
    fn load_account<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<AccountRow>>;
    fn create_account<'a>(&'a self, name: &'a str, password_hash: &'a str) -> StorageFuture<'a, AccountRow>;
    fn set_online<'a>(&'a self, name: &'a str, online: bool) -> StorageFuture<'a, ()>;
    fn clear_all_online(&self) -> StorageFuture<'_, u64>;

    // characters
    fn load_characters<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<CharacterRow>>;
    fn load_character<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<CharacterRow>>;
    fn char_name_exists<'a>(&'a self, name: &'a str) -> StorageFuture<'a, bool>;
    fn create_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, i32>;
    fn delete_character(&self, char_id: i32) -> StorageFuture<'_, ()>;
    fn mark_delete(&self, char_id: i32, delete_at: i64) -> StorageFuture<'_, ()>;
    fn save_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, ()>;

    // per-character collections
    fn load_inventory(&self, char_id: i32) -> StorageFuture<'_, Vec<ItemRow>>;
    /// Replace a stored inventory. Returns false when a newer save is
    /// already stored and this one was ignored.
    fn save_inventory<'a>(&'a self, save: &'a InventorySave) -> StorageFuture<'a, bool>;
    fn load_bookmarks(&self, char_id: i32) -> StorageFuture<'_, Vec<Bookmark>>;
    fn save_bookmarks<'a>(&'a self, char_id: i32, marks: &'a [Bookmark]) -> StorageFuture<'a, ()>;
    fn load_known_spells(&self, char_id: i32) -> StorageFuture<'_, Vec<i32>>;
    fn save_known_spells<'a>(&'a self, char_id: i32, spells: &'a [i32]) -> StorageFuture<'a, ()>;
    fn load_buffs(&self, char_id: i32) -> StorageFuture<'_, Vec<BuffRow>>;
    fn save_buffs<'a>(&'a self, char_id: i32, buffs: &'a [BuffRow]) -> StorageFuture<'a, ()>;
    fn load_map_times(&self, char_id: i32) -> StorageFuture<'_, HashMap<i32, i32>>;
    fn save_map_times<'a>(&'a self, char_id: i32, times: &'a HashMap<i32, i32>) -> StorageFuture<'a, ()>;
    fn load_char_config(&self, char_id: i32) -> StorageFuture<'_, Option<Vec<u8>>>;
    fn save_char_config<'a>(&'a self, char_id: i32, blob: &'a [u8]) -> StorageFuture<'a, ()>;
    fn max_item_obj_id(&self) -> StorageFuture<'_, u32>;

    // personal warehouse
    fn load_warehouse<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<WarehouseRow>>;
    fn warehouse_deposit<'a>(&'a self, row: &'a WarehouseRow) -> StorageFuture<'a, i64>;
    /// Take `count` from a row; the row disappears at zero.
    fn warehouse_withdraw(&self, row_id: i64, count: i32) -> StorageFuture<'_, ()>;

    // clans
    fn load_clans(&self) -> StorageFuture<'_, Vec<(ClanRow, Vec<ClanMemberRow>)>>;
    fn create_clan<'a>(&'a self, leader_id: i32, leader_name: &'a str, name: &'a str, found_date: i32) -> StorageFuture<'a, i32>;
    fn dissolve_clan(&self, clan_id: i32) -> StorageFuture<'_, ()>;
    fn add_clan_member<'a>(&'a self, member: &'a ClanMemberRow, clan_name: &'a str) -> StorageFuture<'a, ()>;
    fn remove_clan_member(&self, clan_id: i32, char_id: i32) -> StorageFuture<'_, ()>;
    fn update_member_rank(&self, clan_id: i32, char_id: i32, rank: i32) -> StorageFuture<'_, ()>;
    fn update_member_notes<'a>(&'a self, clan_id: i32, char_id: i32, notes: &'a [u8]) -> StorageFuture<'a, ()>;
    fn update_announcement<'a>(&'a self, clan_id: i32, text: &'a [u8]) -> StorageFuture<'a, ()>;
    fn update_emblem(&self, clan_id: i32, emblem_id: i32) -> StorageFuture<'_, ()>;
    /// `(char_id, clan_id)` of a character by name, online or not.
    fn offline_clan_of<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<(i32, i32)>>;

    // write-ahead log
    fn write_wal<'a>(&'a self, rows: &'a [WalRow]) -> StorageFuture<'a, Vec<i64>>;
    fn mark_wal_processed<'a>(&'a self, tx_ids: &'a [i64]) -> StorageFuture<'a, ()>;
    fn load_pending_wal(&self) -> StorageFuture<'_, Vec<WalRow>>;
    /// Store the inventories a commit produced and mark its WAL rows
    /// processed, all in one transaction.
    fn settle_transfer<'a>(&'a self, inventories: &'a [InventorySave], tx_ids: &'a [i64]) -> StorageFuture<'a, ()>;
    /// Apply one pending WAL row to the stored inventories. Item rows move
    /// the object when the sender still owns it. Stack and gold rows move
    /// the amount only when the sender's stored stack still covers it.
    /// The row is marked processed in the same transaction.
    fn replay_transfer<'a>(&'a self, row: &'a WalRow) -> StorageFuture<'a, Replay>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let r: Result<(), StorageError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(r, Err(StorageError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_result() {
        let r = with_deadline(DB_DEADLINE, async { Ok::<_, StorageError>(7) }).await;
        assert_eq!(r.unwrap(), 7);
    }

    #[test]
    fn test_gold_row_moves_adena() {
        assert_eq!(WalRow::gold(TxType::Trade, 1, 2, 100).stack(), (ADENA_ITEM_ID, 100));
        assert_eq!(WalRow::item(TxType::Trade, 1, 2, 40010, 0, 7, 0).stack(), (40010, 7));
    }

    #[test]
    fn test_tx_type_roundtrip() {
        assert_eq!(TxType::from_i32(TxType::Trade.as_i32()), Some(TxType::Trade));
        assert_eq!(TxType::from_i32(9), None);
    }
}
