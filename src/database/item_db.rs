//! Item templates.

use std::collections::HashMap;

use serde::Deserialize;

use super::ContentError;
use crate::game::types::{Bless, StatDelta, ADENA_ITEM_ID};

/// Equipment slot an item occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Armor,
    Helm,
    Shield,
    Cloak,
    Gloves,
    Boots,
    Amulet,
    Ring,
    Belt,
}

impl EquipSlot {
    pub fn id(self) -> u8 {
        self as u8 + 1
    }

    pub fn from_id(id: u8) -> Option<Self> {
        use EquipSlot::*;
        [Weapon, Armor, Helm, Shield, Cloak, Gloves, Boots, Amulet, Ring, Belt]
            .get(id.checked_sub(1)? as usize)
            .copied()
    }
}

/// What using the item does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemUse {
    #[default]
    None,
    Equip,
    Heal,
    Food,
    TeleportScroll,
    Spellbook,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemTemplate {
    pub id: i32,
    pub name: String,
    /// Client use-type byte
    #[serde(default)]
    pub use_type: u8,
    #[serde(default)]
    pub inv_gfx: u16,
    #[serde(default)]
    pub grd_gfx: u16,
    /// Weight in 1/1000 units
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default)]
    pub bless: Bless,
    #[serde(default = "default_true")]
    pub tradable: bool,
    #[serde(default)]
    pub slot: Option<EquipSlot>,
    /// Visual id sent in the char pack for weapons
    #[serde(default)]
    pub weapon_visual: u8,
    #[serde(default)]
    pub bonus: StatDelta,
    #[serde(default)]
    pub dmg_small: i32,
    #[serde(default)]
    pub dmg_large: i32,
    #[serde(default)]
    pub on_use: ItemUse,
    /// Heal amount or food value
    #[serde(default)]
    pub power: i32,
    /// Skill taught by a spellbook
    #[serde(default)]
    pub skill_id: i32,
}

impl ItemTemplate {
    pub fn is_stackable(&self) -> bool {
        self.stackable || self.id == ADENA_ITEM_ID
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemFile {
    #[serde(default)]
    pub items: Vec<ItemTemplate>,
}

#[derive(Debug, Default)]
pub struct ItemTable {
    items: HashMap<i32, ItemTemplate>,
}

impl ItemTable {
    pub fn from_file(file: ItemFile) -> Result<Self, ContentError> {
        let mut items = HashMap::with_capacity(file.items.len());
        for item in file.items {
            let id = item.id;
            if items.insert(id, item).is_some() {
                return Err(ContentError::Duplicate { table: "item", id });
            }
        }
        Ok(Self { items })
    }

    pub fn get(&self, id: i32) -> Option<&ItemTemplate> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS: &str = r#"
items:
  - id: 40308
    name: "金幣"
    inv_gfx: 318
    grd_gfx: 318
    weight: 0
  - id: 20
    name: "Long Sword"
    slot: weapon
    weapon_visual: 4
    bonus: { str: 2, max_hp: 10 }
"#;

    fn table() -> ItemTable {
        ItemTable::from_file(serde_yaml::from_str(ITEMS).unwrap()).unwrap()
    }

    #[test]
    fn test_adena_is_always_stackable() {
        let t = table();
        assert!(t.get(ADENA_ITEM_ID).unwrap().is_stackable());
        assert!(!t.get(20).unwrap().is_stackable());
    }

    #[test]
    fn test_bonus_and_slot() {
        let t = table();
        let sword = t.get(20).unwrap();
        assert_eq!(sword.slot, Some(EquipSlot::Weapon));
        assert_eq!(sword.bonus.str_, 2);
        assert_eq!(sword.bonus.max_hp, 10);
        assert!(sword.tradable);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let file: ItemFile = serde_yaml::from_str("items: [{id: 1, name: a}, {id: 1, name: b}]").unwrap();
        assert!(matches!(ItemTable::from_file(file), Err(ContentError::Duplicate { id: 1, .. })));
    }

    #[test]
    fn test_equip_slot_ids() {
        assert_eq!(EquipSlot::from_id(EquipSlot::Ring.id()), Some(EquipSlot::Ring));
        assert_eq!(EquipSlot::from_id(0), None);
    }
}
