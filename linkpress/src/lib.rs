// Library interface for linkpress modules
// This allows tests and other binaries to import modules

pub mod classify;
pub mod dispatch;
pub mod extract;
pub mod slack;
pub mod store;
pub mod sync;
