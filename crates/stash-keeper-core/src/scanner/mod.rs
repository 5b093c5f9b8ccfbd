pub mod listing;

pub use listing::{list_matching_files, matches_extension, normalize_extension, ListedFile};
