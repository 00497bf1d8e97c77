pub mod aof;
pub mod client;
pub mod commands;
pub mod config;
pub mod db;
pub mod dict;
pub mod frame;
pub mod list;
pub mod object;
pub mod rdb;
pub mod reactor;
pub mod server;
pub mod skiplist;
pub mod zset;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
