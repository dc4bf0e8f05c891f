pub mod pairs;
pub mod schema;

pub use pairs::parse_pairs;
pub use schema::{CardSnapshot, OwnerId, Word, WordId, WordStats};
