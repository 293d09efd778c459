pub mod reward;
pub mod server;
pub mod storage;
