pub mod bot;
pub mod config;
pub mod error;
pub mod process;
pub mod utils;
