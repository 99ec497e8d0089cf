pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod providers;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use server::{AppState, PubkeydServer, ServerBuilder, build_app};
