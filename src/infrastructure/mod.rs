pub mod media;
pub mod storage;
pub mod workspace;
