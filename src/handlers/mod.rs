pub mod companion;
pub mod config;

pub use companion::*;
pub use config::*;
