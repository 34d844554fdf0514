pub mod action_cache;
pub mod bytestream;
pub mod capabilities;
pub mod cas;
pub mod execution;
