pub mod types;

pub use types::{Candidate, Content, ContentRole, Part, StreamChunk};
