//! MySQL-backed [`Storage`].

use std::collections::HashMap;

use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use super::*;

pub struct MySqlStorage {
    pool: MySqlPool,
}

const CHAR_COLUMNS: &str = "`objid`, `account_name`, `char_name`, `type`, `class`, `sex`, `level`, `exp`, \
     `cur_hp`, `cur_mp`, `max_hp`, `max_mp`, `str`, `dex`, `con`, `wis`, `cha`, `intel`, `ac`, `mr`, \
     `lawful`, `locx`, `locy`, `mapid`, `heading`, `food`, `title`, `clanid`, `clanname`, `clan_rank`, \
     `pk_count`, `karma`, `bonus_status`, `elixir_status`, `birthday`, `delete_time`";

fn character_from_row(r: &MySqlRow) -> Result<CharacterRow, sqlx::Error> {
    Ok(CharacterRow {
        id: r.try_get("objid")?,
        account: r.try_get("account_name")?,
        name: r.try_get("char_name")?,
        class_type: r.try_get("type")?,
        class_gfx: r.try_get("class")?,
        sex: r.try_get("sex")?,
        level: r.try_get("level")?,
        exp: r.try_get("exp")?,
        hp: r.try_get("cur_hp")?,
        mp: r.try_get("cur_mp")?,
        base: StatDelta {
            str_: r.try_get("str")?,
            dex: r.try_get("dex")?,
            con: r.try_get("con")?,
            wis: r.try_get("wis")?,
            cha: r.try_get("cha")?,
            intel: r.try_get("intel")?,
            max_hp: r.try_get("max_hp")?,
            max_mp: r.try_get("max_mp")?,
            ac: r.try_get("ac")?,
            mr: r.try_get("mr")?,
            ..Default::default()
        },
        lawful: r.try_get("lawful")?,
        x: r.try_get("locx")?,
        y: r.try_get("locy")?,
        map: r.try_get("mapid")?,
        heading: r.try_get("heading")?,
        food: r.try_get("food")?,
        title: r.try_get("title")?,
        clan_id: r.try_get("clanid")?,
        clan_name: r.try_get("clanname")?,
        clan_rank: r.try_get("clan_rank")?,
        pk_count: r.try_get("pk_count")?,
        karma: r.try_get("karma")?,
        bonus_stats: r.try_get("bonus_status")?,
        elixir_stats: r.try_get("elixir_status")?,
        birthday: r.try_get("birthday")?,
        delete_at: r.try_get("delete_time")?,
    })
}

fn wal_from_row(r: &MySqlRow) -> Result<WalRow, sqlx::Error> {
    let tx_type: i32 = r.try_get("tx_type")?;
    Ok(WalRow {
        tx_id: r.try_get("tx_id")?,
        tx_type: TxType::from_i32(tx_type).unwrap_or(TxType::Trade),
        from_char: r.try_get("from_char")?,
        to_char: r.try_get("to_char")?,
        item_id: r.try_get("item_id")?,
        obj_id: r.try_get("obj_id")?,
        count: r.try_get("count")?,
        enchant: r.try_get("enchant")?,
        gold: r.try_get("gold")?,
        processed: r.try_get("processed")?,
    })
}

impl MySqlStorage {
    /// Connect and bring the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = MySqlPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    // ============================================
    // Accounts
    // ============================================

    /// Fetch one account by login name.
    async fn q_load_account(&self, name: &str) -> Result<Option<AccountRow>, StorageError> {
        let row: Option<(String, String, i32, bool, bool)> = sqlx::query_as(
            "SELECT `login`, `password`, `access_level`, `online`, `banned` FROM `accounts` WHERE `login` = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(name, password_hash, access_level, online, banned)| AccountRow {
            name,
            password_hash,
            access_level,
            online,
            banned,
        }))
    }

    async fn q_create_account(&self, name: &str, password_hash: &str) -> Result<AccountRow, StorageError> {
        let res = sqlx::query("INSERT IGNORE INTO `accounts` (`login`, `password`, `lastactive`) VALUES (?, ?, NOW())")
            .bind(name)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!("account {}", name)));
        }
        Ok(AccountRow {
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            access_level: 0,
            online: false,
            banned: false,
        })
    }

    async fn q_set_online(&self, name: &str, online: bool) -> Result<(), StorageError> {
        sqlx::query("UPDATE `accounts` SET `online` = ?, `lastactive` = NOW() WHERE `login` = ?")
            .bind(online)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset every online flag; run once at boot.
    async fn q_clear_all_online(&self) -> Result<u64, StorageError> {
        let res = sqlx::query("UPDATE `accounts` SET `online` = 0 WHERE `online` = 1")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    // ============================================
    // Characters
    // ============================================

    async fn q_load_characters(&self, account: &str) -> Result<Vec<CharacterRow>, StorageError> {
        let sql = format!("SELECT {} FROM `characters` WHERE `account_name` = ? ORDER BY `objid`", CHAR_COLUMNS);
        let rows = sqlx::query(&sql).bind(account).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(character_from_row).collect::<Result<_, _>>()?)
    }

    async fn q_load_character(&self, name: &str) -> Result<Option<CharacterRow>, StorageError> {
        let sql = format!("SELECT {} FROM `characters` WHERE `char_name` = ?", CHAR_COLUMNS);
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(character_from_row).transpose()?)
    }

    /// Returns true if character name is already taken.
    async fn q_char_name_exists(&self, name: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT COUNT(*) FROM `characters` WHERE `char_name` = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(n,)| n > 0).unwrap_or(false))
    }

    async fn q_create_character(&self, c: &CharacterRow) -> Result<i32, StorageError> {
        if self.q_char_name_exists(&c.name).await? {
            return Err(StorageError::Conflict(format!("character {}", c.name)));
        }
        let res = sqlx::query(
            "INSERT INTO `characters` (`account_name`, `char_name`, `type`, `class`, `sex`, `level`, `exp`,
             `cur_hp`, `cur_mp`, `max_hp`, `max_mp`, `str`, `dex`, `con`, `wis`, `cha`, `intel`, `ac`, `mr`,
             `lawful`, `locx`, `locy`, `mapid`, `heading`, `food`, `title`, `bonus_status`, `birthday`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.account).bind(&c.name).bind(c.class_type).bind(c.class_gfx).bind(c.sex)
        .bind(c.level).bind(c.exp).bind(c.hp).bind(c.mp)
        .bind(c.base.max_hp).bind(c.base.max_mp)
        .bind(c.base.str_).bind(c.base.dex).bind(c.base.con).bind(c.base.wis).bind(c.base.cha).bind(c.base.intel)
        .bind(c.base.ac).bind(c.base.mr)
        .bind(c.lawful).bind(c.x).bind(c.y).bind(c.map).bind(c.heading).bind(c.food)
        .bind(&c.title).bind(c.bonus_stats).bind(c.birthday)
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_id() as i32)
    }

    /// Remove a character and everything it owns.
    async fn q_delete_character(&self, char_id: i32) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "character_items",
            "character_inventory_seq",
            "character_bookmarks",
            "character_skills",
            "character_buffs",
            "character_map_times",
            "character_config",
            "clan_members",
        ] {
            let sql = format!("DELETE FROM `{}` WHERE `char_id` = ?", table);
            sqlx::query(&sql).bind(char_id).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM `characters` WHERE `objid` = ?")
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn q_mark_delete(&self, char_id: i32, delete_at: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE `characters` SET `delete_time` = ? WHERE `objid` = ?")
            .bind(delete_at)
            .bind(char_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_save_character(&self, c: &CharacterRow) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE `characters` SET `level` = ?, `exp` = ?, `cur_hp` = ?, `cur_mp` = ?, `max_hp` = ?, `max_mp` = ?,
             `str` = ?, `dex` = ?, `con` = ?, `wis` = ?, `cha` = ?, `intel` = ?, `ac` = ?, `mr` = ?,
             `lawful` = ?, `locx` = ?, `locy` = ?, `mapid` = ?, `heading` = ?, `food` = ?, `title` = ?,
             `clanid` = ?, `clanname` = ?, `clan_rank` = ?, `pk_count` = ?, `karma` = ?,
             `bonus_status` = ?, `elixir_status` = ?
             WHERE `objid` = ?",
        )
        .bind(c.level).bind(c.exp).bind(c.hp).bind(c.mp).bind(c.base.max_hp).bind(c.base.max_mp)
        .bind(c.base.str_).bind(c.base.dex).bind(c.base.con).bind(c.base.wis).bind(c.base.cha).bind(c.base.intel)
        .bind(c.base.ac).bind(c.base.mr)
        .bind(c.lawful).bind(c.x).bind(c.y).bind(c.map).bind(c.heading).bind(c.food).bind(&c.title)
        .bind(c.clan_id).bind(&c.clan_name).bind(c.clan_rank).bind(c.pk_count).bind(c.karma)
        .bind(c.bonus_stats).bind(c.elixir_stats)
        .bind(c.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============================================
    // Per-character collections
    // ============================================

    async fn q_load_inventory(&self, char_id: i32) -> Result<Vec<ItemRow>, StorageError> {
        let rows: Vec<(u32, i32, i32, i32, u8, bool, bool)> = sqlx::query_as(
            "SELECT `id`, `item_id`, `count`, `enchantlvl`, `bless`, `is_id`, `is_equipped`
             FROM `character_items` WHERE `char_id` = ? ORDER BY `id`",
        )
        .bind(char_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(obj_id, item_id, count, enchant, bless, identified, equipped)| ItemRow {
                obj_id,
                char_id,
                item_id,
                count,
                enchant,
                bless,
                identified,
                equipped,
            })
            .collect())
    }

    /// Replace the whole inventory in one transaction.
    async fn q_save_inventory(&self, save: &InventorySave) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let stored = write_inventory(&mut tx, save).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn q_load_bookmarks(&self, char_id: i32) -> Result<Vec<Bookmark>, StorageError> {
        let rows: Vec<(i32, String, i32, i32, i32)> = sqlx::query_as(
            "SELECT `id`, `name`, `locx`, `locy`, `mapid` FROM `character_bookmarks` WHERE `char_id` = ? ORDER BY `id`",
        )
        .bind(char_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, name, x, y, map)| Bookmark { id, name, x, y, map }).collect())
    }

    async fn q_save_bookmarks(&self, char_id: i32, marks: &[Bookmark]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM `character_bookmarks` WHERE `char_id` = ?")
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        for b in marks {
            sqlx::query(
                "INSERT INTO `character_bookmarks` (`id`, `char_id`, `name`, `locx`, `locy`, `mapid`) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(b.id).bind(char_id).bind(&b.name).bind(b.x).bind(b.y).bind(b.map)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn q_load_known_spells(&self, char_id: i32) -> Result<Vec<i32>, StorageError> {
        let rows: Vec<(i32,)> = sqlx::query_as("SELECT `skill_id` FROM `character_skills` WHERE `char_id` = ? ORDER BY `skill_id`")
            .bind(char_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn q_save_known_spells(&self, char_id: i32, spells: &[i32]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM `character_skills` WHERE `char_id` = ?")
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        for id in spells {
            sqlx::query("INSERT IGNORE INTO `character_skills` (`char_id`, `skill_id`) VALUES (?, ?)")
                .bind(char_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Buffs are stored as one JSON document per character.
    async fn q_load_buffs(&self, char_id: i32) -> Result<Vec<BuffRow>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT `data` FROM `character_buffs` WHERE `char_id` = ?")
            .bind(char_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((data,)) if !data.is_empty() => Ok(serde_json::from_str(&data)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn q_save_buffs(&self, char_id: i32, buffs: &[BuffRow]) -> Result<(), StorageError> {
        let data = serde_json::to_string(buffs)?;
        sqlx::query("REPLACE INTO `character_buffs` (`char_id`, `data`) VALUES (?, ?)")
            .bind(char_id)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_load_map_times(&self, char_id: i32) -> Result<HashMap<i32, i32>, StorageError> {
        let rows: Vec<(i32, i32)> = sqlx::query_as("SELECT `group_id`, `used_secs` FROM `character_map_times` WHERE `char_id` = ?")
            .bind(char_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn q_save_map_times(&self, char_id: i32, times: &HashMap<i32, i32>) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for (group, used) in times {
            sqlx::query("REPLACE INTO `character_map_times` (`char_id`, `group_id`, `used_secs`) VALUES (?, ?, ?)")
                .bind(char_id)
                .bind(group)
                .bind(used)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn q_load_char_config(&self, char_id: i32) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT `data` FROM `character_config` WHERE `char_id` = ?")
            .bind(char_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(d,)| d))
    }

    async fn q_save_char_config(&self, char_id: i32, blob: &[u8]) -> Result<(), StorageError> {
        sqlx::query("REPLACE INTO `character_config` (`char_id`, `data`) VALUES (?, ?)")
            .bind(char_id)
            .bind(blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_max_item_obj_id(&self) -> Result<u32, StorageError> {
        let row: (Option<u32>,) = sqlx::query_as("SELECT MAX(`id`) FROM `character_items`")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.unwrap_or(0))
    }

    // ============================================
    // Warehouse
    // ============================================

    async fn q_load_warehouse(&self, account: &str) -> Result<Vec<WarehouseRow>, StorageError> {
        let rows: Vec<(i64, i32, i32, i32, u8)> = sqlx::query_as(
            "SELECT `id`, `item_id`, `count`, `enchantlvl`, `bless` FROM `character_warehouse`
             WHERE `account_name` = ? ORDER BY `id`",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, item_id, count, enchant, bless)| WarehouseRow {
                id,
                account: account.to_string(),
                item_id,
                count,
                enchant,
                bless,
            })
            .collect())
    }

    async fn q_warehouse_deposit(&self, row: &WarehouseRow) -> Result<i64, StorageError> {
        let res = sqlx::query(
            "INSERT INTO `character_warehouse` (`account_name`, `item_id`, `count`, `enchantlvl`, `bless`) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.account).bind(row.item_id).bind(row.count).bind(row.enchant).bind(row.bless)
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_id() as i64)
    }

    async fn q_warehouse_withdraw(&self, row_id: i64, count: i32) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(i32,)> = sqlx::query_as("SELECT `count` FROM `character_warehouse` WHERE `id` = ? FOR UPDATE")
            .bind(row_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((have,)) = row else {
            return Err(StorageError::NotFound(format!("warehouse row {}", row_id)));
        };
        if have <= count {
            sqlx::query("DELETE FROM `character_warehouse` WHERE `id` = ?")
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE `character_warehouse` SET `count` = `count` - ? WHERE `id` = ?")
                .bind(count)
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ============================================
    // Clans
    // ============================================

    async fn q_load_clans(&self) -> Result<Vec<(ClanRow, Vec<ClanMemberRow>)>, StorageError> {
        let rows = sqlx::query(
            "SELECT `clan_id`, `clan_name`, `leader_id`, `leader_name`, `found_date`, `has_castle`, `has_house`,
             `announcement`, `emblem_id` FROM `clan_data` ORDER BY `clan_id`",
        )
        .fetch_all(&self.pool)
        .await?;
        let members: Vec<(i32, i32, String, i32, Option<Vec<u8>>)> =
            sqlx::query_as("SELECT `clan_id`, `char_id`, `char_name`, `rank`, `notes` FROM `clan_members`")
                .fetch_all(&self.pool)
                .await?;
        let mut by_clan: HashMap<i32, Vec<ClanMemberRow>> = HashMap::new();
        for (clan_id, char_id, name, rank, notes) in members {
            by_clan.entry(clan_id).or_default().push(ClanMemberRow {
                clan_id,
                char_id,
                name,
                rank,
                notes: notes.unwrap_or_default(),
            });
        }
        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let announcement: Option<Vec<u8>> = r.try_get("announcement")?;
            let clan = ClanRow {
                id: r.try_get("clan_id")?,
                name: r.try_get("clan_name")?,
                leader_id: r.try_get("leader_id")?,
                leader_name: r.try_get("leader_name")?,
                found_date: r.try_get("found_date")?,
                has_castle: r.try_get("has_castle")?,
                has_house: r.try_get("has_house")?,
                announcement: announcement.unwrap_or_default(),
                emblem_id: r.try_get("emblem_id")?,
            };
            let members = by_clan.remove(&clan.id).unwrap_or_default();
            out.push((clan, members));
        }
        Ok(out)
    }

    async fn q_create_clan(&self, leader_id: i32, leader_name: &str, name: &str, found_date: i32) -> Result<i32, StorageError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "INSERT IGNORE INTO `clan_data` (`clan_name`, `leader_id`, `leader_name`, `found_date`) VALUES (?, ?, ?, ?)",
        )
        .bind(name).bind(leader_id).bind(leader_name).bind(found_date)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!("clan {}", name)));
        }
        let clan_id = res.last_insert_id() as i32;
        sqlx::query("REPLACE INTO `clan_members` (`clan_id`, `char_id`, `char_name`, `rank`) VALUES (?, ?, ?, 10)")
            .bind(clan_id)
            .bind(leader_id)
            .bind(leader_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE `characters` SET `clanid` = ?, `clanname` = ?, `clan_rank` = 10 WHERE `objid` = ?")
            .bind(clan_id)
            .bind(name)
            .bind(leader_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(clan_id)
    }

    async fn q_dissolve_clan(&self, clan_id: i32) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE `characters` SET `clanid` = 0, `clanname` = '', `clan_rank` = 0 WHERE `clanid` = ?")
            .bind(clan_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM `clan_members` WHERE `clan_id` = ?")
            .bind(clan_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM `clan_data` WHERE `clan_id` = ?")
            .bind(clan_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn q_add_clan_member(&self, m: &ClanMemberRow, clan_name: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("REPLACE INTO `clan_members` (`clan_id`, `char_id`, `char_name`, `rank`, `notes`) VALUES (?, ?, ?, ?, ?)")
            .bind(m.clan_id).bind(m.char_id).bind(&m.name).bind(m.rank).bind(&m.notes)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE `characters` SET `clanid` = ?, `clanname` = ?, `clan_rank` = ?, `title` = '' WHERE `objid` = ?")
            .bind(m.clan_id).bind(clan_name).bind(m.rank).bind(m.char_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn q_remove_clan_member(&self, clan_id: i32, char_id: i32) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM `clan_members` WHERE `clan_id` = ? AND `char_id` = ?")
            .bind(clan_id)
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE `characters` SET `clanid` = 0, `clanname` = '', `clan_rank` = 0 WHERE `objid` = ?")
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn q_update_member_rank(&self, clan_id: i32, char_id: i32, rank: i32) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE `clan_members` SET `rank` = ? WHERE `clan_id` = ? AND `char_id` = ?")
            .bind(rank)
            .bind(clan_id)
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE `characters` SET `clan_rank` = ? WHERE `objid` = ?")
            .bind(rank)
            .bind(char_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn q_update_member_notes(&self, clan_id: i32, char_id: i32, notes: &[u8]) -> Result<(), StorageError> {
        sqlx::query("UPDATE `clan_members` SET `notes` = ? WHERE `clan_id` = ? AND `char_id` = ?")
            .bind(notes)
            .bind(clan_id)
            .bind(char_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_update_announcement(&self, clan_id: i32, text: &[u8]) -> Result<(), StorageError> {
        sqlx::query("UPDATE `clan_data` SET `announcement` = ? WHERE `clan_id` = ?")
            .bind(text)
            .bind(clan_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_update_emblem(&self, clan_id: i32, emblem_id: i32) -> Result<(), StorageError> {
        sqlx::query("UPDATE `clan_data` SET `emblem_id` = ? WHERE `clan_id` = ?")
            .bind(emblem_id)
            .bind(clan_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn q_offline_clan_of(&self, name: &str) -> Result<Option<(i32, i32)>, StorageError> {
        let row: Option<(i32, i32)> = sqlx::query_as("SELECT `objid`, `clanid` FROM `characters` WHERE `char_name` = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // ============================================
    // Write-ahead log
    // ============================================

    /// Insert every row in one transaction; all or nothing.
    async fn q_write_wal(&self, rows: &[WalRow]) -> Result<Vec<i64>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(rows.len());
        for r in rows {
            let res = sqlx::query(
                "INSERT INTO `trade_wal` (`tx_type`, `from_char`, `to_char`, `item_id`, `obj_id`, `count`, `enchant`, `gold`)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(r.tx_type.as_i32()).bind(r.from_char).bind(r.to_char).bind(r.item_id)
            .bind(r.obj_id).bind(r.count).bind(r.enchant).bind(r.gold)
            .execute(&mut *tx)
            .await?;
            ids.push(res.last_insert_id() as i64);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn q_mark_wal_processed(&self, tx_ids: &[i64]) -> Result<(), StorageError> {
        for id in tx_ids {
            sqlx::query("UPDATE `trade_wal` SET `processed` = 1 WHERE `tx_id` = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn q_load_pending_wal(&self) -> Result<Vec<WalRow>, StorageError> {
        let rows = sqlx::query(
            "SELECT `tx_id`, `tx_type`, `from_char`, `to_char`, `item_id`, `obj_id`, `count`, `enchant`, `gold`, `processed`
             FROM `trade_wal` WHERE `processed` = 0 ORDER BY `tx_id`",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(wal_from_row).collect::<Result<_, _>>()?)
    }

    async fn q_settle_transfer(&self, inventories: &[InventorySave], tx_ids: &[i64]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for save in inventories {
            write_inventory(&mut tx, save).await?;
        }
        for id in tx_ids {
            sqlx::query("UPDATE `trade_wal` SET `processed` = 1 WHERE `tx_id` = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn q_replay_transfer(&self, row: &WalRow) -> Result<Replay, StorageError> {
        let mut tx = self.pool.begin().await?;
        let outcome = if row.obj_id != 0 {
            let owner: Option<i32> = sqlx::query_scalar("SELECT `char_id` FROM `character_items` WHERE `id` = ? FOR UPDATE")
                .bind(row.obj_id)
                .fetch_optional(&mut *tx)
                .await?;
            match owner {
                Some(c) if c == row.to_char => Replay::AlreadyApplied,
                Some(c) if c == row.from_char => {
                    sqlx::query("UPDATE `character_items` SET `char_id` = ?, `is_equipped` = 0 WHERE `id` = ?")
                        .bind(row.to_char)
                        .bind(row.obj_id)
                        .execute(&mut *tx)
                        .await?;
                    Replay::Applied
                }
                _ => Replay::Skipped,
            }
        } else {
            replay_stack(&mut tx, row).await?
        };
        sqlx::query("UPDATE `trade_wal` SET `processed` = 1 WHERE `tx_id` = ?")
            .bind(row.tx_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

/// Replace one inventory unless a newer save already landed.
async fn write_inventory(tx: &mut sqlx::Transaction<'_, sqlx::MySql>, save: &InventorySave) -> Result<bool, StorageError> {
    let stored: Option<u64> = sqlx::query_scalar("SELECT `seq` FROM `character_inventory_seq` WHERE `char_id` = ? FOR UPDATE")
        .bind(save.char_id)
        .fetch_optional(&mut **tx)
        .await?;
    if stored.is_some_and(|s| s > save.seq) {
        return Ok(false);
    }
    sqlx::query("DELETE FROM `character_items` WHERE `char_id` = ?")
        .bind(save.char_id)
        .execute(&mut **tx)
        .await?;
    for it in &save.items {
        sqlx::query(
            "REPLACE INTO `character_items` (`id`, `char_id`, `item_id`, `count`, `enchantlvl`, `bless`, `is_id`, `is_equipped`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(it.obj_id).bind(save.char_id).bind(it.item_id).bind(it.count)
        .bind(it.enchant).bind(it.bless).bind(it.identified).bind(it.equipped)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query("REPLACE INTO `character_inventory_seq` (`char_id`, `seq`) VALUES (?, ?)")
        .bind(save.char_id)
        .bind(save.seq)
        .execute(&mut **tx)
        .await?;
    Ok(true)
}

/// Move a stack amount between stored inventories when the sender still covers it.
async fn replay_stack(tx: &mut sqlx::Transaction<'_, sqlx::MySql>, row: &WalRow) -> Result<Replay, StorageError> {
    let (item_id, amount) = row.stack();
    if amount <= 0 {
        return Ok(Replay::Skipped);
    }
    let from: Option<(u32, i32)> = sqlx::query_as(
        "SELECT `id`, `count` FROM `character_items` WHERE `char_id` = ? AND `item_id` = ? AND `count` >= ? LIMIT 1 FOR UPDATE",
    )
    .bind(row.from_char)
    .bind(item_id)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await?;
    let Some((from_obj, have)) = from else {
        return Ok(Replay::Skipped);
    };
    if have == amount {
        sqlx::query("DELETE FROM `character_items` WHERE `id` = ?")
            .bind(from_obj)
            .execute(&mut **tx)
            .await?;
    } else {
        sqlx::query("UPDATE `character_items` SET `count` = `count` - ? WHERE `id` = ?")
            .bind(amount)
            .bind(from_obj)
            .execute(&mut **tx)
            .await?;
    }

    let to: Option<u32> =
        sqlx::query_scalar("SELECT `id` FROM `character_items` WHERE `char_id` = ? AND `item_id` = ? LIMIT 1 FOR UPDATE")
            .bind(row.to_char)
            .bind(item_id)
            .fetch_optional(&mut **tx)
            .await?;
    match to {
        Some(to_obj) => {
            sqlx::query("UPDATE `character_items` SET `count` = `count` + ? WHERE `id` = ?")
                .bind(amount)
                .bind(to_obj)
                .execute(&mut **tx)
                .await?;
        }
        None => {
            let (max,): (Option<u32>,) = sqlx::query_as("SELECT MAX(`id`) FROM `character_items` FOR UPDATE")
                .fetch_one(&mut **tx)
                .await?;
            sqlx::query(
                "INSERT INTO `character_items` (`id`, `char_id`, `item_id`, `count`, `enchantlvl`, `bless`, `is_id`, `is_equipped`)
                 VALUES (?, ?, ?, ?, ?, 1, 1, 0)",
            )
            .bind(max.unwrap_or(0) + 1).bind(row.to_char).bind(item_id).bind(amount).bind(row.enchant)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(Replay::Applied)
}

impl Storage for MySqlStorage {
    fn load_account<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<AccountRow>> {
        Box::pin(self.q_load_account(name))
    }
    fn create_account<'a>(&'a self, name: &'a str, password_hash: &'a str) -> StorageFuture<'a, AccountRow> {
        Box::pin(self.q_create_account(name, password_hash))
    }
    fn set_online<'a>(&'a self, name: &'a str, online: bool) -> StorageFuture<'a, ()> {
        Box::pin(self.q_set_online(name, online))
    }
    fn clear_all_online(&self) -> StorageFuture<'_, u64> {
        Box::pin(self.q_clear_all_online())
    }

    fn load_characters<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<CharacterRow>> {
        Box::pin(self.q_load_characters(account))
    }
    fn load_character<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<CharacterRow>> {
        Box::pin(self.q_load_character(name))
    }
    fn char_name_exists<'a>(&'a self, name: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(self.q_char_name_exists(name))
    }
    fn create_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, i32> {
        Box::pin(self.q_create_character(row))
    }
    fn delete_character(&self, char_id: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_delete_character(char_id))
    }
    fn mark_delete(&self, char_id: i32, delete_at: i64) -> StorageFuture<'_, ()> {
        Box::pin(self.q_mark_delete(char_id, delete_at))
    }
    fn save_character<'a>(&'a self, row: &'a CharacterRow) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_character(row))
    }

    fn load_inventory(&self, char_id: i32) -> StorageFuture<'_, Vec<ItemRow>> {
        Box::pin(self.q_load_inventory(char_id))
    }
    fn save_inventory<'a>(&'a self, save: &'a InventorySave) -> StorageFuture<'a, bool> {
        Box::pin(self.q_save_inventory(save))
    }
    fn load_bookmarks(&self, char_id: i32) -> StorageFuture<'_, Vec<Bookmark>> {
        Box::pin(self.q_load_bookmarks(char_id))
    }
    fn save_bookmarks<'a>(&'a self, char_id: i32, marks: &'a [Bookmark]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_bookmarks(char_id, marks))
    }
    fn load_known_spells(&self, char_id: i32) -> StorageFuture<'_, Vec<i32>> {
        Box::pin(self.q_load_known_spells(char_id))
    }
    fn save_known_spells<'a>(&'a self, char_id: i32, spells: &'a [i32]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_known_spells(char_id, spells))
    }
    fn load_buffs(&self, char_id: i32) -> StorageFuture<'_, Vec<BuffRow>> {
        Box::pin(self.q_load_buffs(char_id))
    }
    fn save_buffs<'a>(&'a self, char_id: i32, buffs: &'a [BuffRow]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_buffs(char_id, buffs))
    }
    fn load_map_times(&self, char_id: i32) -> StorageFuture<'_, HashMap<i32, i32>> {
        Box::pin(self.q_load_map_times(char_id))
    }
    fn save_map_times<'a>(&'a self, char_id: i32, times: &'a HashMap<i32, i32>) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_map_times(char_id, times))
    }
    fn load_char_config(&self, char_id: i32) -> StorageFuture<'_, Option<Vec<u8>>> {
        Box::pin(self.q_load_char_config(char_id))
    }
    fn save_char_config<'a>(&'a self, char_id: i32, blob: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_save_char_config(char_id, blob))
    }
    fn max_item_obj_id(&self) -> StorageFuture<'_, u32> {
        Box::pin(self.q_max_item_obj_id())
    }

    fn load_warehouse<'a>(&'a self, account: &'a str) -> StorageFuture<'a, Vec<WarehouseRow>> {
        Box::pin(self.q_load_warehouse(account))
    }
    fn warehouse_deposit<'a>(&'a self, row: &'a WarehouseRow) -> StorageFuture<'a, i64> {
        Box::pin(self.q_warehouse_deposit(row))
    }
    fn warehouse_withdraw(&self, row_id: i64, count: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_warehouse_withdraw(row_id, count))
    }

    fn load_clans(&self) -> StorageFuture<'_, Vec<(ClanRow, Vec<ClanMemberRow>)>> {
        Box::pin(self.q_load_clans())
    }
    fn create_clan<'a>(&'a self, leader_id: i32, leader_name: &'a str, name: &'a str, found_date: i32) -> StorageFuture<'a, i32> {
        Box::pin(self.q_create_clan(leader_id, leader_name, name, found_date))
    }
    fn dissolve_clan(&self, clan_id: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_dissolve_clan(clan_id))
    }
    fn add_clan_member<'a>(&'a self, member: &'a ClanMemberRow, clan_name: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(self.q_add_clan_member(member, clan_name))
    }
    fn remove_clan_member(&self, clan_id: i32, char_id: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_remove_clan_member(clan_id, char_id))
    }
    fn update_member_rank(&self, clan_id: i32, char_id: i32, rank: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_update_member_rank(clan_id, char_id, rank))
    }
    fn update_member_notes<'a>(&'a self, clan_id: i32, char_id: i32, notes: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_update_member_notes(clan_id, char_id, notes))
    }
    fn update_announcement<'a>(&'a self, clan_id: i32, text: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_update_announcement(clan_id, text))
    }
    fn update_emblem(&self, clan_id: i32, emblem_id: i32) -> StorageFuture<'_, ()> {
        Box::pin(self.q_update_emblem(clan_id, emblem_id))
    }
    fn offline_clan_of<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<(i32, i32)>> {
        Box::pin(self.q_offline_clan_of(name))
    }

    fn write_wal<'a>(&'a self, rows: &'a [WalRow]) -> StorageFuture<'a, Vec<i64>> {
        Box::pin(self.q_write_wal(rows))
    }
    fn mark_wal_processed<'a>(&'a self, tx_ids: &'a [i64]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_mark_wal_processed(tx_ids))
    }
    fn load_pending_wal(&self) -> StorageFuture<'_, Vec<WalRow>> {
        Box::pin(self.q_load_pending_wal())
    }
    fn settle_transfer<'a>(&'a self, inventories: &'a [InventorySave], tx_ids: &'a [i64]) -> StorageFuture<'a, ()> {
        Box::pin(self.q_settle_transfer(inventories, tx_ids))
    }
    fn replay_transfer<'a>(&'a self, row: &'a WalRow) -> StorageFuture<'a, Replay> {
        Box::pin(self.q_replay_transfer(row))
    }
}
