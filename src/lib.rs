pub mod config;
pub mod error;
pub mod intercept;
pub mod logging;
pub mod server;
pub mod translate;
pub mod upstream;

pub use config::ShimConfig;
pub use error::{Result, ShimError};
pub use logging::SharedExchangeLog;
pub use server::{build_router, AppState};
