pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod outbox;
pub mod plan;
pub mod scheduler;
pub mod store;

pub use amount::Amount;
pub use engine::Engine;
pub use model::{AccountId, Command, Decision, InstrumentKind};
pub use plan::PlanCatalog;
pub use store::Store;
