//! Resource materialization: HTTP downloads with a progress bar and
//! archive unpacking with optional top-folder stripping.

mod archive;
mod download;

pub use archive::unpack;
pub use download::download;
