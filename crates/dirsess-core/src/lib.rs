pub mod context;
pub mod controls;
pub mod credentials;
pub mod errors;
pub mod factory;
pub mod ids;

pub use context::{AuthLevel, Identity, SecurityContext};
pub use controls::Control;
pub use credentials::Credentials;
pub use errors::ContextError;
pub use factory::{ContextFactory, DirectoryContextFactory};
pub use ids::{RequestId, SessionId};
