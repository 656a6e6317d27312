pub mod config;
pub mod credentials;

pub use config::{BusyPolicy, ParleyConfig};
pub use credentials::Credentials;
