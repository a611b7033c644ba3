pub mod bus;
pub mod memory;
pub mod storage;
