//! Calculation engine: per-symbol actors, cycle scheduling, ingestion
//! freshness and the service supervisor

pub mod actor;
pub mod emitter;
pub mod ingest;
pub mod supervisor;

pub use actor::{spawn_symbol_actor, ActorConfig, SymbolActorHandle};
pub use ingest::{IngestionStatus, IngestionTracker};
pub use supervisor::{Supervisor, SymbolManager};
