pub mod assistant;
pub mod memory;
pub mod session;
pub mod store;
