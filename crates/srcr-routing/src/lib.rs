//! # SRCR Routing
//!
//! On-demand source routing for multi-hop wireless meshes.
//!
//! Nodes discover routes by flooding deduplicated queries that accumulate
//! per-hop link metrics, learn them from source-routed replies, and send
//! data along the cheapest cached path with the full hop list embedded in
//! every packet. Broken links are detected in-band and the neighbor behind
//! them is blacklisted for a while.
//!
//! ## Core Components
//!
//! - [`SrcrEngine`]: Protocol state machine owning every table of one node
//! - [`SeenTable`]: Query deduplication and best-metric aggregation
//! - [`QueryTracker`]: Discovery attempts this node originated
//! - [`BlackList`]: Neighbors whose link is believed broken
//! - [`PathTable`]: Usage bookkeeping for every path ever learned
//! - [`PathCache`]: Selected path per destination, with route dampening
//! - [`QueryFlushTimer`]: Background task flushing aggregated queries
//!
//! ## Delayed Flooding
//!
//! A node does not rebroadcast a query on first sight. It holds the copy for
//! `query_wait`, lets better copies of the same flood replace it, and only
//! then broadcasts the best one. The destination does not wait: it replies
//! to the first copy it hears and drops the rest of that flood.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use srcr_routing::{QueryFlushTimer, SrcrConfig, SrcrEngine, RoutingError};
//!
//! let engine = SrcrEngine::builder(local)
//!     .config(SrcrConfig::dense_mesh())
//!     .metric(metric)
//!     .transport(transport)
//!     .resolver(resolver)
//!     .build()?;
//! let engine = Arc::new(Mutex::new(engine));
//! let timer = QueryFlushTimer::spawn(engine.clone());
//!
//! // Inbound frames from the radio
//! engine.lock().handle_frame(src_mac, &frame);
//!
//! // Outbound data
//! match engine.lock().start_data(destination, payload) {
//!     Ok(next_hop) => { /* sent */ }
//!     Err(RoutingError::NoRoute { .. }) => { /* discovery started, retry later */ }
//!     Err(e) => { /* other failure */ }
//! }
//! ```

pub mod blacklist;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod path_table;
pub mod query;
pub mod seen;
pub mod stats;
pub mod timer;

// Re-export main types
pub use blacklist::{BlackList, BlackListEntry};
pub use cache::{CurrentPath, PathCache, RejectReason, Selection, SwitchPolicy};
pub use config::{ConfigWarning, SrcrConfig};
pub use engine::{
    DropReason, FlushReport, PacketOutcome, RouteSnapshot, SrcrEngine, SrcrEngineBuilder,
};
pub use error::{ConfigError, RoutingError, RoutingResult};
pub use path_table::{PathInfo, PathTable};
pub use query::{QueryRecord, QueryTracker};
pub use seen::{SeenKey, SeenRecord, SeenTable, SeenUpdate};
pub use stats::EngineStats;
pub use timer::QueryFlushTimer;
