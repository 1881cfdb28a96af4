//! Static content tables (items, NPCs, skills, maps) read at boot from YAML.
//!
//! Tables are immutable after load except for the per-tile occupancy
//! overlay in [`map_db::MapTable`].

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

pub mod item_db;
pub mod magic_db;
pub mod map_db;
pub mod mob_db;

use item_db::ItemTable;
use magic_db::SkillTable;
use map_db::MapTable;
use mob_db::NpcTable;

/// Error types for content loading
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Duplicate {table} id {id}")]
    Duplicate { table: &'static str, id: i32 },
}

/// All content tables the core consults.
#[derive(Debug, Default)]
pub struct Content {
    pub items: ItemTable,
    pub npcs: NpcTable,
    pub skills: SkillTable,
    pub maps: MapTable,
}

impl Content {
    /// Load every table from `dir`. A missing file yields an empty table.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ContentError> {
        let dir = dir.as_ref();
        let content = Content {
            items: ItemTable::from_file(load_yaml(&dir.join("items.yaml"))?)?,
            npcs: NpcTable::from_file(load_yaml(&dir.join("npcs.yaml"))?)?,
            skills: SkillTable::from_file(load_yaml(&dir.join("skills.yaml"))?)?,
            maps: MapTable::from_file(load_yaml(&dir.join("maps.yaml"))?)?,
        };
        tracing::info!(
            "[content] [loaded] items={} npcs={} spawns={} skills={} maps={}",
            content.items.len(),
            content.npcs.len(),
            content.npcs.spawns().len(),
            content.skills.len(),
            content.maps.len()
        );
        Ok(content)
    }

    /// Parse every table from in-memory YAML documents.
    pub fn from_yaml(items: &str, npcs: &str, skills: &str, maps: &str) -> Result<Self, ContentError> {
        Ok(Content {
            items: ItemTable::from_file(parse_yaml(items, "items")?)?,
            npcs: NpcTable::from_file(parse_yaml(npcs, "npcs")?)?,
            skills: SkillTable::from_file(parse_yaml(skills, "skills")?)?,
            maps: MapTable::from_file(parse_yaml(maps, "maps")?)?,
        })
    }
}

fn load_yaml<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ContentError> {
    if !path.exists() {
        tracing::warn!("[content] [missing] path={}", path.display());
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ContentError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_yaml<T: DeserializeOwned + Default>(text: &str, name: &str) -> Result<T, ContentError> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(text).map_err(|source| ContentError::Parse {
        path: PathBuf::from(name),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dir_gives_empty_tables() {
        let content = Content::load("/nonexistent/aden/data").unwrap();
        assert_eq!(content.items.len(), 0);
        assert_eq!(content.maps.len(), 0);
    }

    #[test]
    fn test_parse_error_reports_table() {
        let err = Content::from_yaml("items: [", "", "", "").unwrap_err();
        assert!(err.to_string().contains("items"));
    }

    #[test]
    fn test_bundled_data_dir_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let content = Content::load(dir).unwrap();
        assert!(content.items.get(crate::game::types::ADENA_ITEM_ID).is_some());
        assert!(content.maps.get(4).is_some());
    }
}
