//! Aden - Lineage 3.80C game server core
//!
//! One process accepts the client, walks it through login and the
//! character screen, and runs the shared world on a fixed tick.

// ============================================
// Core Modules
// ============================================

/// Server configuration
pub mod config;
/// Shutdown signal, tick rate and the game clock
pub mod core;
/// Static content tables (items, NPCs, skills, maps)
pub mod database;
/// Gameplay managers over the world state
pub mod game;
/// Framing, cipher, packet codec and opcodes
pub mod network;
/// Storage backends, snapshots and the background writer
pub mod persist;
/// The game server
pub mod servers;
/// Per-connection state and the session registry
pub mod session;
/// The world tick
pub mod tick;
/// Live world state
pub mod world;
