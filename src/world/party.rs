//! Party registry. Parties are keyed by a stable id, not by leader.

use std::collections::HashMap;

pub const MAX_PARTY_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: u32,
    pub leader: i32,
    /// Character ids, leader included
    pub members: Vec<i32>,
}

impl Party {
    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_PARTY_SIZE
    }

    pub fn contains(&self, char_id: i32) -> bool {
        self.members.contains(&char_id)
    }
}

/// What a removal did to the party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyExit {
    /// The character was not in a party
    NotMember,
    /// Member left; the party continues with these members
    Left(Party),
    /// The party was dissolved; these were all its members
    Dissolved(Vec<i32>),
}

#[derive(Debug, Default)]
pub struct PartyRegistry {
    parties: HashMap<u32, Party>,
    by_char: HashMap<i32, u32>,
    next_id: u32,
}

impl PartyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&Party> {
        self.parties.get(&id)
    }

    pub fn party_of(&self, char_id: i32) -> Option<&Party> {
        self.by_char.get(&char_id).and_then(|id| self.parties.get(id))
    }

    pub fn is_leader(&self, char_id: i32) -> bool {
        self.party_of(char_id).map(|p| p.leader == char_id).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn create(&mut self, leader: i32, member: i32) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        self.parties.insert(id, Party { id, leader, members: vec![leader, member] });
        self.by_char.insert(leader, id);
        self.by_char.insert(member, id);
        id
    }

    /// Returns false when the party is gone or full.
    pub fn add(&mut self, id: u32, char_id: i32) -> bool {
        let Some(p) = self.parties.get_mut(&id) else {
            return false;
        };
        if p.is_full() || p.contains(char_id) {
            return false;
        }
        p.members.push(char_id);
        self.by_char.insert(char_id, id);
        true
    }

    /// Remove a member. The party breaks up when the leader leaves or
    /// when fewer than two members would remain.
    pub fn leave(&mut self, char_id: i32) -> PartyExit {
        let Some(&id) = self.by_char.get(&char_id) else {
            return PartyExit::NotMember;
        };
        let Some(p) = self.parties.get_mut(&id) else {
            self.by_char.remove(&char_id);
            return PartyExit::NotMember;
        };
        if p.leader == char_id || p.members.len() <= 2 {
            return PartyExit::Dissolved(self.dissolve(id));
        }
        p.members.retain(|&m| m != char_id);
        let snapshot = p.clone();
        self.by_char.remove(&char_id);
        PartyExit::Left(snapshot)
    }

    /// Kick a member. Same as leave except the leader cannot be kicked.
    pub fn kick(&mut self, char_id: i32) -> PartyExit {
        let Some(p) = self.party_of(char_id) else {
            return PartyExit::NotMember;
        };
        if p.members.len() <= 2 {
            let id = p.id;
            return PartyExit::Dissolved(self.dissolve(id));
        }
        if p.leader == char_id {
            return PartyExit::NotMember;
        }
        self.leave(char_id)
    }

    pub fn dissolve(&mut self, id: u32) -> Vec<i32> {
        let Some(p) = self.parties.remove(&id) else {
            return Vec::new();
        };
        for m in &p.members {
            self.by_char.remove(m);
        }
        p.members
    }

    pub fn set_leader(&mut self, id: u32, char_id: i32) -> bool {
        match self.parties.get_mut(&id) {
            Some(p) if p.contains(char_id) => {
                p.leader = char_id;
                true
            }
            _ => false,
        }
    }
}
