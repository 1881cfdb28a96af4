//! Server implementations
//!
//! One process serves the whole game: the client connects once and stays on
//! the same socket from the version check to logout.

pub mod game;
