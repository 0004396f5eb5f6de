//! Domain services used by the websocket gateway and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//! `room` is the concurrency core; everything else exists to serve it.

pub mod cleanup;
pub mod game;
pub mod logic;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;
