//! Player inventory.

use crate::database::item_db::{ItemTable, ItemTemplate};
use crate::game::types::{Bless, StatDelta, ADENA_ITEM_ID};

/// Client inventory slot limit.
pub const MAX_INVENTORY: usize = 180;

/// Carrying capacity for the given strength and constitution.
pub fn max_weight(str_: i32, con: i32) -> i64 {
    (150.0 * (0.6 * str_ as f64 + 0.4 * con as f64 + 1.0).floor()) as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvItem {
    pub obj_id: u32,
    pub item_id: i32,
    pub count: i32,
    pub enchant: i32,
    pub bless: Bless,
    pub identified: bool,
    pub equipped: bool,
    pub stackable: bool,
}

impl InvItem {
    pub fn new(obj_id: u32, template: &ItemTemplate, count: i32) -> Self {
        Self {
            obj_id,
            item_id: template.id,
            count,
            enchant: 0,
            bless: template.bless,
            identified: true,
            equipped: false,
            stackable: template.is_stackable(),
        }
    }

    pub fn is_adena(&self) -> bool {
        self.item_id == ADENA_ITEM_ID
    }
}

/// Outcome of [`Inventory::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// Merged into an existing stack with this object id
    Merged(u32),
    /// Inserted as a new entry
    New(u32),
}

impl Added {
    pub fn obj_id(self) -> u32 {
        match self {
            Added::Merged(id) | Added::New(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    items: Vec<InvItem>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[InvItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= MAX_INVENTORY
    }

    pub fn get(&self, obj_id: u32) -> Option<&InvItem> {
        self.items.iter().find(|i| i.obj_id == obj_id)
    }

    pub fn get_mut(&mut self, obj_id: u32) -> Option<&mut InvItem> {
        self.items.iter_mut().find(|i| i.obj_id == obj_id)
    }

    pub fn find_stack(&self, item_id: i32) -> Option<&InvItem> {
        self.items.iter().find(|i| i.item_id == item_id && i.stackable)
    }

    /// Would adding this item need a new slot?
    pub fn needs_slot(&self, item: &InvItem) -> bool {
        !(item.stackable && self.find_stack(item.item_id).is_some())
    }

    /// Add `item`, merging into an existing stack when stackable.
    pub fn add(&mut self, item: InvItem) -> Added {
        if item.stackable {
            if let Some(stack) = self.items.iter_mut().find(|i| i.item_id == item.item_id && i.stackable) {
                stack.count = stack.count.saturating_add(item.count);
                return Added::Merged(stack.obj_id);
            }
        }
        let id = item.obj_id;
        self.items.push(item);
        Added::New(id)
    }

    /// Take `count` from an entry. Returns the removed portion; the
    /// portion keeps the original object id only when the whole entry left.
    pub fn take(&mut self, obj_id: u32, count: i32, split_id: impl FnOnce() -> u32) -> Option<InvItem> {
        let idx = self.items.iter().position(|i| i.obj_id == obj_id)?;
        let entry = &mut self.items[idx];
        let count = count.clamp(1, entry.count.max(1));
        if count >= entry.count {
            return Some(self.items.remove(idx));
        }
        entry.count -= count;
        let mut part = entry.clone();
        part.obj_id = split_id();
        part.count = count;
        part.equipped = false;
        Some(part)
    }

    /// Remove the whole entry.
    pub fn remove(&mut self, obj_id: u32) -> Option<InvItem> {
        let idx = self.items.iter().position(|i| i.obj_id == obj_id)?;
        Some(self.items.remove(idx))
    }

    pub fn gold(&self) -> i32 {
        self.find_stack(ADENA_ITEM_ID).map(|i| i.count).unwrap_or(0)
    }

    /// Object id of the adena stack, if any.
    pub fn gold_obj(&self) -> Option<u32> {
        self.find_stack(ADENA_ITEM_ID).map(|i| i.obj_id)
    }

    /// Deduct gold. Removes the stack when it reaches zero.
    /// Returns the remaining count, or None when short.
    pub fn spend_gold(&mut self, amount: i32) -> Option<i32> {
        if amount <= 0 {
            return Some(self.gold());
        }
        let idx = self.items.iter().position(|i| i.item_id == ADENA_ITEM_ID && i.stackable)?;
        if self.items[idx].count < amount {
            return None;
        }
        self.items[idx].count -= amount;
        let left = self.items[idx].count;
        if left == 0 {
            self.items.remove(idx);
        }
        Some(left)
    }

    /// Carried weight in display units. Each weighted entry counts at least 1.
    pub fn weight(&self, table: &ItemTable) -> i64 {
        self.items
            .iter()
            .filter_map(|i| {
                let w = table.get(i.item_id).map(|t| t.weight).unwrap_or(0) as i64;
                (w > 0).then(|| (w * i.count as i64 / 1000).max(1))
            })
            .sum()
    }

    /// Weight on the client's 0..=242 bar.
    pub fn weight242(&self, table: &ItemTable, max: i64) -> u8 {
        if max <= 0 {
            return 0;
        }
        let total = self.weight(table);
        if total >= max {
            return 242;
        }
        ((total as f64 * 242.0 / max as f64).round() as i64).clamp(0, 242) as u8
    }

    /// Would adding `template_weight` (1/1000 units) reach the limit?
    pub fn would_overload(&self, table: &ItemTable, template_weight: i32, count: i32, max: i64) -> bool {
        let extra = if template_weight > 0 { (template_weight as i64 * count.max(1) as i64 / 1000).max(1) } else { 0 };
        extra > 0 && self.weight(table) + extra >= max
    }

    pub fn equipped(&self) -> impl Iterator<Item = &InvItem> {
        self.items.iter().filter(|i| i.equipped)
    }

    /// Sum of template bonuses over equipped items.
    pub fn equip_bonus(&self, table: &ItemTable) -> StatDelta {
        self.equipped()
            .filter_map(|i| table.get(i.item_id))
            .fold(StatDelta::default(), |acc, t| acc.add(&t.bonus))
    }
}
