pub mod common;
pub mod config;
pub mod manager;

pub use common::error::HubError;
pub use config::HubConfig;
pub use manager::Manager;

pub type Result<T> = std::result::Result<T, HubError>;
