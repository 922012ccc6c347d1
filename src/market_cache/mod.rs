//! C1 Market State Cache (§4.1). Holds the latest funding rate, price, and
//! per-venue health; published by ingest, consumed by every other
//! component. Writes are serialized per (venue, symbol) key (§5); reads
//! return non-blocking snapshot copies.

mod cache;
mod venue_priority;

pub use cache::{MarketStateCache, RejectedUpdate};
pub use venue_priority::select_venues;
