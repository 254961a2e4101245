pub mod api;
pub mod contracts;
pub mod storage;
