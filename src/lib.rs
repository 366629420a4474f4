// lazarus-sw - Offline cache worker for the Lazarus note app
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod upstream;
pub mod utils;
pub mod worker;
