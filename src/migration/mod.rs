pub mod audit;
pub mod bounded;
pub mod engine;
pub mod ledger;
pub mod matcher;
pub mod operation;
pub mod pause;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use engine::{CatalogOverview, EngineError, EngineErrorKind, MigrationEngine};
pub use scheduler::BatchProgress;
pub use store::open_store;
