//! CLI command implementations.
//!
//! Each submodule implements a specific CLI command:
//! - [`stream`] - Forward and backward record streaming
//! - [`search`] - Raw pattern search

pub mod search;
pub mod stream;

pub use search::SearchCommand;
pub use stream::StreamCommand;
