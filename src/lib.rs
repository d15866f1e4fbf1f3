pub mod acquisition;
pub mod api;
pub mod config;
pub mod faces;
pub mod imaging;
pub mod server;
pub mod shared;
