//! Deterministic simulation engine for the NPC service.
//!
//! Everything in this crate is pure state + arithmetic: no I/O, no async, no
//! wall clock. The API crate drives it through [`world::SimWorld`] and owns
//! persistence and provider calls. Given the same seed and the same sequence
//! of inputs, a world replays to byte-identical event logs.

pub mod agent;
pub mod faction;
pub mod group;
pub mod memory;
pub mod quest;
pub mod rng;
pub mod social;
pub mod spatial;
pub mod tiering;
pub mod topics;
pub mod world;

pub use world::SimWorld;
