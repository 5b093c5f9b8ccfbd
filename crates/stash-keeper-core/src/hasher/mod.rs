pub mod content;

pub use content::{copy_and_hash, hash_file, hash_reader, ContentHash, ParseHashError};
