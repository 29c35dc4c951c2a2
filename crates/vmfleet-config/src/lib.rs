//! KDL configuration parsing for vmfleet.
//!
//! The whole process is configured from one KDL document: HTTP listener,
//! webhook secret, fleet limits and backoffs, the Orka endpoint, and which
//! VM image backs which runner label.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    FleetConfig, GitHubConfig, ImageConfig, OrkaConfig, ServerConfig, SystemConfig,
    load_system_config, parse_system_config,
};
