//! Document models shared by all scrib interfaces

mod clip;
mod document;
mod tab;

pub use clip::ClipEntry;
pub use document::{DocId, DocKind, Document};
pub use tab::Tab;
