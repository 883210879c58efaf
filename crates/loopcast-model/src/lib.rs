#![forbid(unsafe_code)]
//! Loopcast model SSOT: the JSON shapes served by the content API and the
//! derivation rules (slugs, preview text) shared between store and handlers.

mod content;
mod slug;
mod text;

pub use content::{Email, EmailStats, GroupedEmails, ListRef, MailingList, Paginated};
pub use slug::slugify;
pub use text::{preview_text, strip_tags, PREVIEW_MAX_CHARS};

pub const CRATE_NAME: &str = "loopcast-model";
