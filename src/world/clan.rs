//! In-memory clan registry.

use std::collections::HashMap;

use crate::persist::{ClanMemberRow, ClanRow};

pub const RANK_PUBLIC: i32 = 7;
pub const RANK_PROBATION: i32 = 8;
pub const RANK_GUARDIAN: i32 = 9;
pub const RANK_PRINCE: i32 = 10;

/// Fixed client field widths in Big5 bytes.
pub const ANNOUNCEMENT_LEN: usize = 478;
pub const NOTES_LEN: usize = 62;
pub const EMBLEM_LEN: usize = 384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClanMember {
    pub char_id: i32,
    pub name: String,
    pub rank: i32,
    /// Already Big5 encoded and capped
    pub notes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clan {
    pub id: i32,
    pub name: String,
    pub leader_id: i32,
    pub leader_name: String,
    pub found_date: i32,
    pub has_castle: bool,
    pub has_house: bool,
    /// Already Big5 encoded and capped
    pub announcement: Vec<u8>,
    pub emblem_id: i32,
    pub emblem_status: u8,
    pub members: HashMap<i32, ClanMember>,
}

impl Clan {
    pub fn new(id: i32, name: &str, leader_id: i32, leader_name: &str, found_date: i32) -> Self {
        let mut members = HashMap::new();
        members.insert(
            leader_id,
            ClanMember { char_id: leader_id, name: leader_name.to_string(), rank: RANK_PRINCE, notes: Vec::new() },
        );
        Self {
            id,
            name: name.to_string(),
            leader_id,
            leader_name: leader_name.to_string(),
            found_date,
            has_castle: false,
            has_house: false,
            announcement: Vec::new(),
            emblem_id: 0,
            emblem_status: 0,
            members,
        }
    }

    /// Rebuild a clan from its stored rows. Emblems on record are shown.
    pub fn from_rows(row: ClanRow, members: Vec<ClanMemberRow>) -> Self {
        let members = members
            .into_iter()
            .filter(|m| m.clan_id == row.id)
            .map(|m| (m.char_id, ClanMember { char_id: m.char_id, name: m.name, rank: m.rank, notes: m.notes }))
            .collect();
        Self {
            id: row.id,
            name: row.name,
            leader_id: row.leader_id,
            leader_name: row.leader_name,
            found_date: row.found_date,
            has_castle: row.has_castle,
            has_house: row.has_house,
            announcement: row.announcement,
            emblem_id: row.emblem_id,
            emblem_status: (row.emblem_id > 0) as u8,
            members,
        }
    }

    pub fn member_by_name(&self, name: &str) -> Option<&ClanMember> {
        self.members.values().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Members sorted by id so listings are stable.
    pub fn sorted_members(&self) -> Vec<&ClanMember> {
        let mut v: Vec<&ClanMember> = self.members.values().collect();
        v.sort_by_key(|m| m.char_id);
        v
    }
}

/// Whether `granter` may hand out `rank`.
pub fn can_grant_rank(granter: i32, rank: i32) -> bool {
    match granter {
        RANK_PRINCE => matches!(rank, RANK_PUBLIC | RANK_PROBATION | RANK_GUARDIAN),
        RANK_GUARDIAN => matches!(rank, RANK_PUBLIC | RANK_PROBATION),
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct ClanRegistry {
    clans: HashMap<i32, Clan>,
    by_name: HashMap<String, i32>,
    by_char: HashMap<i32, i32>,
}

impl ClanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i32) -> Option<&Clan> {
        self.clans.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut Clan> {
        self.clans.get_mut(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Clan> {
        self.by_name.get(&name.to_lowercase()).and_then(|id| self.clans.get(id))
    }

    pub fn name_exists(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_lowercase())
    }

    pub fn clan_of(&self, char_id: i32) -> Option<&Clan> {
        self.by_char.get(&char_id).and_then(|id| self.clans.get(id))
    }

    pub fn len(&self) -> usize {
        self.clans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clans.is_empty()
    }

    pub fn insert(&mut self, clan: Clan) {
        for id in clan.members.keys() {
            self.by_char.insert(*id, clan.id);
        }
        self.by_name.insert(clan.name.to_lowercase(), clan.id);
        self.clans.insert(clan.id, clan);
    }

    pub fn remove(&mut self, id: i32) -> Option<Clan> {
        let clan = self.clans.remove(&id)?;
        for cid in clan.members.keys() {
            self.by_char.remove(cid);
        }
        self.by_name.remove(&clan.name.to_lowercase());
        Some(clan)
    }

    pub fn add_member(&mut self, id: i32, member: ClanMember) -> bool {
        let Some(clan) = self.clans.get_mut(&id) else {
            return false;
        };
        self.by_char.insert(member.char_id, id);
        clan.members.insert(member.char_id, member);
        true
    }

    pub fn remove_member(&mut self, id: i32, char_id: i32) -> Option<ClanMember> {
        let clan = self.clans.get_mut(&id)?;
        let m = clan.members.remove(&char_id)?;
        self.by_char.remove(&char_id);
        Some(m)
    }

    pub fn set_rank(&mut self, id: i32, char_id: i32, rank: i32) -> bool {
        match self.clans.get_mut(&id).and_then(|c| c.members.get_mut(&char_id)) {
            Some(m) => {
                m.rank = rank;
                true
            }
            None => false,
        }
    }

    pub fn max_emblem_id(&self) -> i32 {
        self.clans.values().map(|c| c.emblem_id).max().unwrap_or(0)
    }
}
