//! Server configuration module
//!
//! Parses server configuration from YAML (default) or TOML files.
//! Every field has a default so a config only needs the database credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // ============================================
    // Network
    // ============================================
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Server id reported in the version reply
    #[serde(default = "default_server_id")]
    pub server_id: u8,

    /// Client language code (3 = Taiwan)
    #[serde(default = "default_language")]
    pub language: u8,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Bytes queued for one session before it is dropped
    #[serde(default = "default_send_high_water")]
    pub send_high_water: usize,

    #[serde(default = "default_max_packets_per_second")]
    pub max_packets_per_second: u32,

    #[serde(default = "default_login_attempts_per_minute")]
    pub login_attempts_per_minute: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    // ============================================
    // MySQL Database Configuration
    // ============================================
    #[serde(default = "default_sql_ip")]
    pub sql_ip: String,

    #[serde(default = "default_sql_port")]
    pub sql_port: u16,

    #[serde(default)]
    pub sql_id: String,

    #[serde(default)]
    pub sql_pw: String,

    #[serde(default)]
    pub sql_db: String,

    // ============================================
    // Accounts & Characters
    // ============================================
    #[serde(default = "default_true")]
    pub auto_create_accounts: bool,

    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    #[serde(default = "default_char_slots")]
    pub char_slots: u8,

    /// Characters at or above `delete_min_level` are deleted after a grace period
    #[serde(default = "default_true")]
    pub delete_7_days: bool,

    #[serde(default = "default_delete_min_level")]
    pub delete_min_level: i32,

    // ============================================
    // World
    // ============================================
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_queue_size")]
    pub attack_queue: usize,

    #[serde(default = "default_queue_size")]
    pub skill_queue: usize,

    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,

    #[serde(default = "default_start_adena")]
    pub start_adena: i32,

    #[serde(default = "default_clan_create_cost")]
    pub clan_create_cost: i32,

    /// Directory holding items.yaml, npcs.yaml, skills.yaml and maps.yaml
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_emblem_dir")]
    pub emblem_dir: String,
}

// ============================================
// Default value functions
// ============================================

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    2000
}

fn default_server_id() -> u8 {
    1
}

fn default_language() -> u8 {
    3
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_send_high_water() -> usize {
    1024 * 1024
}

fn default_max_packets_per_second() -> u32 {
    60
}

fn default_login_attempts_per_minute() -> u32 {
    10
}

fn default_max_connections() -> usize {
    2000
}

fn default_sql_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_sql_port() -> u16 {
    3306
}

fn default_true() -> bool {
    true
}

fn default_bcrypt_cost() -> u32 {
    10
}

fn default_char_slots() -> u8 {
    6
}

fn default_delete_min_level() -> i32 {
    5
}

fn default_tick_ms() -> u64 {
    200
}

fn default_queue_size() -> usize {
    128
}

fn default_save_interval_secs() -> u64 {
    30
}

fn default_start_adena() -> i32 {
    20000
}

fn default_clan_create_cost() -> i32 {
    30000
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_emblem_dir() -> String {
    "emblem".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            bind_port: default_bind_port(),
            server_id: default_server_id(),
            language: default_language(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            send_high_water: default_send_high_water(),
            max_packets_per_second: default_max_packets_per_second(),
            login_attempts_per_minute: default_login_attempts_per_minute(),
            max_connections: default_max_connections(),
            sql_ip: default_sql_ip(),
            sql_port: default_sql_port(),
            sql_id: String::new(),
            sql_pw: String::new(),
            sql_db: String::new(),
            auto_create_accounts: true,
            bcrypt_cost: default_bcrypt_cost(),
            char_slots: default_char_slots(),
            delete_7_days: true,
            delete_min_level: default_delete_min_level(),
            tick_ms: default_tick_ms(),
            attack_queue: default_queue_size(),
            skill_queue: default_queue_size(),
            save_interval_secs: default_save_interval_secs(),
            start_adena: default_start_adena(),
            clan_create_cost: default_clan_create_cost(),
            data_dir: default_data_dir(),
            emblem_dir: default_emblem_dir(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML or TOML file (chosen by extension)
    ///
    /// # Example
    /// ```no_run
    /// use aden::config::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("conf/server.yaml")
    ///     .expect("Failed to load config");
    /// println!("SQL DB: {}", config.sql_db);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config: ServerConfig = if is_toml {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML in {}", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML in {}", path.display()))?
        };

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(contents)
            .context("Failed to parse TOML")?;

        config.validate()?;

        Ok(config)
    }

    /// Checks that required fields are set and values are reasonable
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.sql_ip.is_empty(), "sql_ip cannot be empty");
        anyhow::ensure!(!self.sql_id.is_empty(), "sql_id cannot be empty");
        anyhow::ensure!(!self.sql_db.is_empty(), "sql_db cannot be empty");
        anyhow::ensure!(self.tick_ms > 0, "tick_ms must be positive");
        anyhow::ensure!(
            self.attack_queue > 0 && self.skill_queue > 0,
            "queue sizes must be positive"
        );
        anyhow::ensure!(
            (4..=31).contains(&self.bcrypt_cost),
            "bcrypt_cost out of range: {} (4..=31)",
            self.bcrypt_cost
        );
        anyhow::ensure!(self.char_slots > 0, "char_slots must be positive");
        anyhow::ensure!(self.max_connections > 0, "max_connections must be positive");
        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.bind_port)
    }

    pub fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.sql_id, self.sql_pw, self.sql_ip, self.sql_port, self.sql_db
        )
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    /// A config for tests: no database, cheap bcrypt.
    pub fn test_only() -> Self {
        Self {
            bind_ip: "127.0.0.1".to_string(),
            bind_port: 0,
            sql_id: "test".to_string(),
            sql_db: "test".to_string(),
            bcrypt_cost: 4,
            ..Self::default()
        }
    }
}
