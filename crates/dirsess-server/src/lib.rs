pub mod connection;
pub mod executor;
pub mod protocol;
pub mod server;
pub mod settings;

pub use executor::{DelayedExecutor, ExecOutcome, OperationExecutor};
pub use server::{start, ServerError, ServerHandle};
pub use settings::{
    load_settings, load_settings_from_path, RejectedOverride, ServerSettings, SettingsError,
};
pub use connection::{handle_connection, Services};
pub use protocol::{Operation, Response, Status};
