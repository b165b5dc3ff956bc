pub mod mem;
pub mod simulator;

pub use mem::{Dispatcher, FlatMemory, Packet};
pub use simulator::Simulator;
