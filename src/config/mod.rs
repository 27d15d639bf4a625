mod logging;
mod server;

pub use logging::{DEFAULT_LOG_FILTER, log_filter};
pub use server::{OidcConfig, OidcSettings, ServerConfig};
