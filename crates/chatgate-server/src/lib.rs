pub mod actions;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod frames;
pub mod handlers;
pub mod metric_names;
pub mod registry;
pub mod relay;
pub mod report;
pub mod server;
pub mod session;
pub mod sweeper;

pub use config::ServerConfig;
pub use dispatch::{ActionHandler, Dispatcher};
pub use errors::{ApiError, HandlerError, SessionFault};
pub use registry::{BroadcastReport, EvictReason, Registry};
pub use relay::{RelayEvent, RelayOutcome, StreamRelay};
pub use report::StartupReport;
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::Session;
pub use sweeper::Sweeper;
