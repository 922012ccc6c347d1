//! Cross-exchange funding-rate arbitrage core.
//!
//! Six cooperating components (§4) communicate over an in-process
//! [`bus::TopicBus`] stand-in for the production message fabric (§1, out of
//! scope): the Market State Cache (C1), Opportunity Engine (C2), Capital
//! Allocator (C3), Execution Coordinator (C4), Position Manager (C5), and
//! Risk Controller (C6). Each owns a disjoint slice of the data model (§3)
//! exclusively; every other component sees only immutable snapshots.

pub mod activity;
pub mod allocator;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod market_cache;
pub mod models;
pub mod opportunity;
pub mod position;
pub mod risk;
pub mod store;
pub mod venue;

pub use config::Config;
pub use error::{CoreError, CoreResult};
