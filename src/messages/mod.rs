pub mod api;
pub mod handlers;
mod models;

pub use models::{Attachment, AttachmentKind, Message, MessageStats, TopAuthor};
