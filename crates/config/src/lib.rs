//! Configuration for the Janus gateway client.
//!
//! Files are discovered as `janus.{toml,yaml,yml,json}` in the working
//! directory or `~/.config/janus/`, with `${ENV}` placeholders expanded
//! before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, discover_and_load, load, load_config, set_config_dir},
    schema::{GatewayConfig, JanusConfig},
};
