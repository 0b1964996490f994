//! GitHub API services built on the retrying client.

mod collaborators;
mod contents;

pub use collaborators::CollaboratorsService;
pub use contents::{ContentsService, FileLocation};
