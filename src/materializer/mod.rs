//! Turns a fetched subtree into env files on disk.

mod env_file;
mod materializer;

pub use env_file::render_env_file;
pub use materializer::Materializer;
