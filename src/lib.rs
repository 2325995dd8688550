//! A node-pool orchestration layer for Lavalink-protocol audio nodes:
//! tracks per-guild players, routes voice-gateway packets, and re-balances
//! players across nodes on disconnect.

#[macro_use]
extern crate log;

pub mod autoplay;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod ids;
pub mod manager;
pub mod node;
pub mod player;
pub mod queue;
pub mod rest;
pub mod session;
pub mod track;

pub use config::ManagerOptions;
pub use error::{Error, Result};
pub use manager::Manager;
pub use player::Player;
