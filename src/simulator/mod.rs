pub mod config;
pub mod peers;
pub mod sim;
pub mod simulator;
pub mod utils;

pub use simulator::{Simulator, Summary};
