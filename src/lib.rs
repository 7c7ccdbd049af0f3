pub mod constants;
pub mod dda;
pub mod engine;
pub mod file_store;
pub mod maze;
pub mod maze_stats;
pub mod practice;
pub mod rating;
pub mod rng;
pub mod scoring;
pub mod server_protocol;
pub mod server_utils;
pub mod skill;
pub mod store;
pub mod types;
