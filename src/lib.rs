//! A small, single-server IRC daemon: message parsing lives in
//! `corvid-tokens`, line framing in `corvid-reader`, case-insensitive name
//! lookups in `corvid-unicase`. This crate holds the parts that stay
//! specific to running the server: client and channel state, the registry
//! that owns both, the command router on top, and the transport that feeds
//! it bytes.

pub mod channel;
pub mod client;
pub mod config;
pub mod counters;
pub mod lines;
pub mod modes;
pub mod server;
pub mod util;
pub mod validate;

/// The one [`server::Server`] instance, behind the one lock every connection
/// task and the accept loop share. There is no per-client or per-channel
/// locking: a single `Mutex` around the whole registry is simpler to reason
/// about than fine-grained locks, and every operation it guards is cheap
/// (slab lookups, a handful of `HashMap` operations) compared to the network
/// I/O around it.
pub type Shared = std::sync::Arc<tokio::sync::Mutex<server::Server>>;

