pub mod config;
pub mod upload;

pub use config::*;
pub use upload::*;
