//! In-memory [`Storage`] used by tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::*;

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, AccountRow>,
    chars: HashMap<i32, CharacterRow>,
    next_char: i32,
    items: HashMap<i32, Vec<ItemRow>>,
    inventory_seq: HashMap<i32, u64>,
    bookmarks: HashMap<i32, Vec<Bookmark>>,
    spells: HashMap<i32, Vec<i32>>,
    buffs: HashMap<i32, Vec<BuffRow>>,
    map_times: HashMap<i32, HashMap<i32, i32>>,
    configs: HashMap<i32, Vec<u8>>,
    warehouse: Vec<WarehouseRow>,
    next_wh: i64,
    clans: HashMap<i32, ClanRow>,
    clan_members: HashMap<i32, Vec<ClanMemberRow>>,
    next_clan: i32,
    wal: Vec<WalRow>,
    next_tx: i64,
}

/// Everything behind one mutex; calls complete immediately.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    fail_wal: AtomicBool,
    fail_settle: AtomicBool,
    fail_online: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following WAL write fail.
    pub fn set_fail_wal(&self, fail: bool) {
        self.fail_wal.store(fail, Ordering::Release);
    }

    /// Make every following settle fail, leaving WAL rows pending.
    pub fn set_fail_settle(&self, fail: bool) {
        self.fail_settle.store(fail, Ordering::Release);
    }

    /// Make every following online-flag write fail.
    pub fn set_fail_online(&self, fail: bool) {
        self.fail_online.store(fail, Ordering::Release);
    }

    /// Every WAL row written so far.
    pub fn wal_rows(&self) -> Vec<WalRow> {
        self.lock().wal.clone()
    }

    pub fn character_by_name(&self, name: &str) -> Option<CharacterRow> {
        let g = self.lock();
        g.chars.values().find(|c| c.name.eq_ignore_ascii_case(name)).cloned()
    }

    pub fn inventory_of(&self, char_id: i32) -> Vec<ItemRow> {
        self.lock().items.get(&char_id).cloned().unwrap_or_default()
    }

    pub fn account_online(&self, name: &str) -> bool {
        self.lock().accounts.get(name).map(|a| a.online).unwrap_or(false)
    }

    pub fn set_banned(&self, name: &str, banned: bool) {
        if let Some(a) = self.lock().accounts.get_mut(name) {
            a.banned = banned;
        }
    }

    /// Insert a character directly, bypassing the create flow.
    pub fn seed_character(&self, mut row: CharacterRow) -> i32 {
        let mut g = self.lock();
        g.next_char += 1;
        if row.id == 0 {
            row.id = g.next_char;
        }
        let id = row.id;
        g.chars.insert(id, row);
        id
    }

    pub fn seed_items(&self, char_id: i32, items: Vec<ItemRow>) {
        self.lock().items.insert(char_id, items);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ready<'a, T: Send + 'a>(v: Result<T, StorageError>) -> StorageFuture<'a, T> {
        Box::pin(std::future::ready(v))
    }
}

impl Inner {
    fn store_inventory(&mut self, save: &InventorySave) -> bool {
        if self.inventory_seq.get(&save.char_id).is_some_and(|&stored| stored > save.seq) {
            return false;
        }
        self.inventory_seq.insert(save.char_id, save.seq);
        self.items.insert(save.char_id, save.items.clone());
        true
    }

    fn replay(&mut self, row: &WalRow) -> Replay {
        if row.obj_id != 0 {
            let owner = self
                .items
                .iter()
                .find(|(_, rows)| rows.iter().any(|r| r.obj_id == row.obj_id))
                .map(|(c, _)| *c);
            return match owner {
                Some(c) if c == row.to_char => Replay::AlreadyApplied,
                Some(c) if c == row.from_char => {
                    let rows = self.items.entry(c).or_default();
                    let Some(idx) = rows.iter().position(|r| r.obj_id == row.obj_id) else {
                        return Replay::Skipped;
                    };
                    let mut moved = rows.remove(idx);
                    moved.char_id = row.to_char;
                    moved.equipped = false;
                    self.items.entry(row.to_char).or_default().push(moved);
                    Replay::Applied
                }
                _ => Replay::Skipped,
            };
        }

        let (item_id, amount) = row.stack();
        if amount <= 0 {
            return Replay::Skipped;
        }
        let from = self.items.entry(row.from_char).or_default();
        let Some(idx) = from.iter().position(|r| r.item_id == item_id && r.count >= amount) else {
            return Replay::Skipped;
        };
        from[idx].count -= amount;
        if from[idx].count == 0 {
            from.remove(idx);
        }
        let next_obj = self.items.values().flatten().map(|r| r.obj_id).max().unwrap_or(0) + 1;
        let to = self.items.entry(row.to_char).or_default();
        match to.iter_mut().find(|r| r.item_id == item_id) {
            Some(stack) => stack.count += amount,
            None => to.push(ItemRow {
                obj_id: next_obj,
                char_id: row.to_char,
                item_id,
                count: amount,
                enchant: row.enchant,
                bless: 1,
                identified: true,
                equipped: false,
            }),
        }
        Replay::Applied
    }
}

impl Storage for MemoryStorage {
    fn load_account<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<AccountRow>> {
        Self::ready(Ok(self.lock().accounts.get(name).cloned()))
    }

    fn create_account<'a>(&'a self, name: &'a str, password_hash: &'a str) -> StorageFuture<'a, AccountRow> {
        let mut g = self.lock();
        if g.accounts.contains_key(name) {
            return Self::ready(Err(StorageError::Conflict(format!("account {}", name))));
        }
        let row = AccountRow {
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            access_level: 0,
            online: false,
            banned: false,
        };
        g.accounts.insert(name.to_string(), row.clone());
        Self::ready(Ok(row))
    }

    fn set_online<'a>(&'a self, name: &'a str, online: bool) -> StorageFuture<'a, ()> {
        if self.fail_online.load(Ordering::Acquire) {
            return Self::ready(Err(StorageError::Conflict("online write rejected".into())));
        }
        if let Some(a) = self.lock().accounts.get_mut(name) {
            a.online = online;
        }
        Self::ready(Ok(()))
    }

    fn clear_all_online(&self) -> StorageFuture<'_, u64> {
        let mut g = self.lock();
        let mut n = 0;
        for a in g.accounts.values_mut().filter(|a| a.online) {
            a.online = false;
            n += 1;
        }
        Self::ready(Ok(n))
    }

    fn load_characters<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<CharacterRow>> {
        let g = self.lock();
        let mut v: Vec<CharacterRow> = g.chars.values().filter(|c| c.account == account).cloned().collect();
        v.sort_by_key(|c| c.id);
        Self::ready(Ok(v))
    }

    fn load_character<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<CharacterRow>> {
        Self::ready(Ok(self.character_by_name(name)))
    }

    fn char_name_exists<'a>(&'a self, name: &'a str) -> StorageFuture<'a, bool> {
        Self::ready(Ok(self.character_by_name(name).is_some()))
    }

    fn create_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, i32> {
        if self.character_by_name(&row.name).is_some() {
            return Self::ready(Err(StorageError::Conflict(format!("character {}", row.name))));
        }
        let mut row = row.clone();
        row.id = 0;
        Self::ready(Ok(self.seed_character(row)))
    }

    fn delete_character(&self, char_id: i32) -> StorageFuture<'_, ()> {
        let mut g = self.lock();
        g.chars.remove(&char_id);
        g.items.remove(&char_id);
        g.bookmarks.remove(&char_id);
        g.spells.remove(&char_id);
        g.buffs.remove(&char_id);
        g.map_times.remove(&char_id);
        g.configs.remove(&char_id);
        Self::ready(Ok(()))
    }

    fn mark_delete(&self, char_id: i32, delete_at: i64) -> StorageFuture<'_, ()> {
        if let Some(c) = self.lock().chars.get_mut(&char_id) {
            c.delete_at = Some(delete_at);
        }
        Self::ready(Ok(()))
    }

    fn save_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, ()> {
        let mut g = self.lock();
        if !g.chars.contains_key(&row.id) {
            return Self::ready(Err(StorageError::NotFound(format!("character {}", row.id))));
        }
        g.chars.insert(row.id, row.clone());
        Self::ready(Ok(()))
    }

    fn load_inventory(&self, char_id: i32) -> StorageFuture<'_, Vec<ItemRow>> {
        Self::ready(Ok(self.inventory_of(char_id)))
    }

    fn save_inventory<'a>(&'a self, save: &'a InventorySave) -> StorageFuture<'a, bool> {
        Self::ready(Ok(self.lock().store_inventory(save)))
    }

    fn load_bookmarks(&self, char_id: i32) -> StorageFuture<'_, Vec<Bookmark>> {
        Self::ready(Ok(self.lock().bookmarks.get(&char_id).cloned().unwrap_or_default()))
    }

    fn save_bookmarks<'a>(&'a self, char_id: i32, marks: &'a [Bookmark]) -> StorageFuture<'a, ()> {
        self.lock().bookmarks.insert(char_id, marks.to_vec());
        Self::ready(Ok(()))
    }

    fn load_known_spells(&self, char_id: i32) -> StorageFuture<'_, Vec<i32>> {
        Self::ready(Ok(self.lock().spells.get(&char_id).cloned().unwrap_or_default()))
    }

    fn save_known_spells<'a>(&'a self, char_id: i32, spells: &'a [i32]) -> StorageFuture<'a, ()> {
        self.lock().spells.insert(char_id, spells.to_vec());
        Self::ready(Ok(()))
    }

    fn load_buffs(&self, char_id: i32) -> StorageFuture<'_, Vec<BuffRow>> {
        Self::ready(Ok(self.lock().buffs.get(&char_id).cloned().unwrap_or_default()))
    }

    fn save_buffs<'a>(&'a self, char_id: i32, buffs: &'a [BuffRow]) -> StorageFuture<'a, ()> {
        self.lock().buffs.insert(char_id, buffs.to_vec());
        Self::ready(Ok(()))
    }

    fn load_map_times(&self, char_id: i32) -> StorageFuture<'_, HashMap<i32, i32>> {
        Self::ready(Ok(self.lock().map_times.get(&char_id).cloned().unwrap_or_default()))
    }

    fn save_map_times<'a>(&'a self, char_id: i32, times: &'a HashMap<i32, i32>) -> StorageFuture<'a, ()> {
        self.lock().map_times.insert(char_id, times.clone());
        Self::ready(Ok(()))
    }

    fn load_char_config(&self, char_id: i32) -> StorageFuture<'_, Option<Vec<u8>>> {
        Self::ready(Ok(self.lock().configs.get(&char_id).cloned()))
    }

    fn save_char_config<'a>(&'a self, char_id: i32, blob: &'a [u8]) -> StorageFuture<'a, ()> {
        self.lock().configs.insert(char_id, blob.to_vec());
        Self::ready(Ok(()))
    }

    fn max_item_obj_id(&self) -> StorageFuture<'_, u32> {
        let g = self.lock();
        let max = g.items.values().flatten().map(|i| i.obj_id).max().unwrap_or(0);
        Self::ready(Ok(max))
    }

    fn load_warehouse<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<WarehouseRow>> {
        let g = self.lock();
        Self::ready(Ok(g.warehouse.iter().filter(|r| r.account == account).cloned().collect()))
    }

    fn warehouse_deposit<'a>(&'a self, row: &'a WarehouseRow) -> StorageFuture<'a, i64> {
        let mut g = self.lock();
        g.next_wh += 1;
        let mut row = row.clone();
        row.id = g.next_wh;
        let id = row.id;
        g.warehouse.push(row);
        Self::ready(Ok(id))
    }

    fn warehouse_withdraw(&self, row_id: i64, count: i32) -> StorageFuture<'_, ()> {
        let mut g = self.lock();
        let Some(idx) = g.warehouse.iter().position(|r| r.id == row_id) else {
            return Self::ready(Err(StorageError::NotFound(format!("warehouse row {}", row_id))));
        };
        if g.warehouse[idx].count <= count {
            g.warehouse.remove(idx);
        } else {
            g.warehouse[idx].count -= count;
        }
        Self::ready(Ok(()))
    }

    fn load_clans(&self) -> StorageFuture<'_, Vec<(ClanRow, Vec<ClanMemberRow>)>> {
        let g = self.lock();
        let mut v: Vec<(ClanRow, Vec<ClanMemberRow>)> = g
            .clans
            .values()
            .map(|c| (c.clone(), g.clan_members.get(&c.id).cloned().unwrap_or_default()))
            .collect();
        v.sort_by_key(|(c, _)| c.id);
        Self::ready(Ok(v))
    }

    fn create_clan<'a>(&'a self, leader_id: i32, leader_name: &'a str, name: &'a str, found_date: i32) -> StorageFuture<'a, i32> {
        let mut g = self.lock();
        if g.clans.values().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Self::ready(Err(StorageError::Conflict(format!("clan {}", name))));
        }
        g.next_clan += 1;
        let id = g.next_clan;
        g.clans.insert(
            id,
            ClanRow {
                id,
                name: name.to_string(),
                leader_id,
                leader_name: leader_name.to_string(),
                found_date,
                has_castle: false,
                has_house: false,
                announcement: Vec::new(),
                emblem_id: 0,
            },
        );
        g.clan_members.insert(
            id,
            vec![ClanMemberRow { clan_id: id, char_id: leader_id, name: leader_name.to_string(), rank: 10, notes: Vec::new() }],
        );
        if let Some(c) = g.chars.get_mut(&leader_id) {
            c.clan_id = id;
            c.clan_name = name.to_string();
            c.clan_rank = 10;
        }
        Self::ready(Ok(id))
    }

    fn dissolve_clan(&self, clan_id: i32) -> StorageFuture<'_, ()> {
        let mut g = self.lock();
        g.clans.remove(&clan_id);
        g.clan_members.remove(&clan_id);
        for c in g.chars.values_mut().filter(|c| c.clan_id == clan_id) {
            c.clan_id = 0;
            c.clan_name.clear();
            c.clan_rank = 0;
        }
        Self::ready(Ok(()))
    }

    fn add_clan_member<'a>(&'a self, member: &'a ClanMemberRow, clan_name: &'a str) -> StorageFuture<'a, ()> {
        let mut g = self.lock();
        g.clan_members.entry(member.clan_id).or_default().push(member.clone());
        if let Some(c) = g.chars.get_mut(&member.char_id) {
            c.clan_id = member.clan_id;
            c.clan_name = clan_name.to_string();
            c.clan_rank = member.rank;
        }
        Self::ready(Ok(()))
    }

    fn remove_clan_member(&self, clan_id: i32, char_id: i32) -> StorageFuture<'_, ()> {
        let mut g = self.lock();
        if let Some(m) = g.clan_members.get_mut(&clan_id) {
            m.retain(|r| r.char_id != char_id);
        }
        if let Some(c) = g.chars.get_mut(&char_id) {
            c.clan_id = 0;
            c.clan_name.clear();
            c.clan_rank = 0;
        }
        Self::ready(Ok(()))
    }

    fn update_member_rank(&self, clan_id: i32, char_id: i32, rank: i32) -> StorageFuture<'_, ()> {
        let mut g = self.lock();
        if let Some(m) = g.clan_members.get_mut(&clan_id).and_then(|v| v.iter_mut().find(|r| r.char_id == char_id)) {
            m.rank = rank;
        }
        if let Some(c) = g.chars.get_mut(&char_id) {
            c.clan_rank = rank;
        }
        Self::ready(Ok(()))
    }

    fn update_member_notes<'a>(&'a self, clan_id: i32, char_id: i32, notes: &'a [u8]) -> StorageFuture<'a, ()> {
        let mut g = self.lock();
        if let Some(m) = g.clan_members.get_mut(&clan_id).and_then(|v| v.iter_mut().find(|r| r.char_id == char_id)) {
            m.notes = notes.to_vec();
        }
        Self::ready(Ok(()))
    }

    fn update_announcement<'a>(&'a self, clan_id: i32, text: &'a [u8]) -> StorageFuture<'a, ()> {
        if let Some(c) = self.lock().clans.get_mut(&clan_id) {
            c.announcement = text.to_vec();
        }
        Self::ready(Ok(()))
    }

    fn update_emblem(&self, clan_id: i32, emblem_id: i32) -> StorageFuture<'_, ()> {
        if let Some(c) = self.lock().clans.get_mut(&clan_id) {
            c.emblem_id = emblem_id;
        }
        Self::ready(Ok(()))
    }

    fn offline_clan_of<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<(i32, i32)>> {
        Self::ready(Ok(self.character_by_name(name).map(|c| (c.id, c.clan_id))))
    }

    fn write_wal<'a>(&'a self, rows: &'a [WalRow]) -> StorageFuture<'a, Vec<i64>> {
        if self.fail_wal.load(Ordering::Acquire) {
            return Self::ready(Err(StorageError::Conflict("wal write rejected".into())));
        }
        let mut g = self.lock();
        let mut ids = Vec::with_capacity(rows.len());
        for r in rows {
            g.next_tx += 1;
            let mut r = r.clone();
            r.tx_id = g.next_tx;
            ids.push(r.tx_id);
            g.wal.push(r);
        }
        Self::ready(Ok(ids))
    }

    fn mark_wal_processed<'a>(&'a self, tx_ids: &'a [i64]) -> StorageFuture<'a, ()> {
        let mut g = self.lock();
        for r in g.wal.iter_mut().filter(|r| tx_ids.contains(&r.tx_id)) {
            r.processed = true;
        }
        Self::ready(Ok(()))
    }

    fn load_pending_wal(&self) -> StorageFuture<'_, Vec<WalRow>> {
        Self::ready(Ok(self.lock().wal.iter().filter(|r| !r.processed).cloned().collect()))
    }

    fn settle_transfer<'a>(&'a self, inventories: &'a [InventorySave], tx_ids: &'a [i64]) -> StorageFuture<'a, ()> {
        if self.fail_settle.load(Ordering::Acquire) {
            return Self::ready(Err(StorageError::Conflict("settle rejected".into())));
        }
        let mut g = self.lock();
        for save in inventories {
            g.store_inventory(save);
        }
        for r in g.wal.iter_mut().filter(|r| tx_ids.contains(&r.tx_id)) {
            r.processed = true;
        }
        Self::ready(Ok(()))
    }

    fn replay_transfer<'a>(&'a self, row: &'a WalRow) -> StorageFuture<'a, Replay> {
        let mut g = self.lock();
        let outcome = g.replay(row);
        for r in g.wal.iter_mut().filter(|r| r.tx_id == row.tx_id) {
            r.processed = true;
        }
        Self::ready(Ok(outcome))
    }
}
