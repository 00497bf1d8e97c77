//! JSON configuration, named by a single positional CLI argument.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub appendonly: bool,
    pub appendfilename: String,
    pub appendfsync: FsyncPolicy,
    pub dbfilename: String,
    /// Auto-snapshot once this much time has passed since the last save and
    /// at least `save_changes` mutations are pending. Zero disables.
    pub save_seconds: u64,
    pub save_changes: u64,
    pub loglevel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncPolicy {
    Always,
    Everysec,
    No,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 6767,
            appendonly: false,
            appendfilename: "appendonly.aof".to_string(),
            appendfsync: FsyncPolicy::Always,
            dbfilename: "dump.rdb".to_string(),
            save_seconds: 0,
            save_changes: 0,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> crate::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}
