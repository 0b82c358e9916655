pub mod schema;

pub use schema::{Config, GatewayConfig, RelayConfig, CONFIG_DIR_ENV};
