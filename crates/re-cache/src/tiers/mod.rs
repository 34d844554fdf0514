pub mod composed;
pub mod disk;
pub mod memory;
pub mod redis;
