pub mod config;
pub mod error;
pub mod handle;
pub mod policy;
pub mod registry;
pub mod request_table;
pub mod session_table;
pub mod stats;

pub use config::{ContextSource, RegistryConfig};
pub use error::{CancelError, RegistryError};
pub use handle::{CancelFn, RequestHandle, RequestHandleBuilder};
pub use policy::{AccessDecision, AccessPolicy, AccessSettings, AnonymousAccessFlag};
pub use registry::{Registry, SessionInfo};
pub use request_table::{AbandonOutcome, RequestTable};
pub use session_table::SessionTable;
pub use stats::{RegistryStats, StatsSnapshot};
