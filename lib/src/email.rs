use chrono::{DateTime, Utc};

/// A single outgoing message, as the caller describes it. The sender is
/// implicit: it comes from the `Config` the client was built with.
#[derive(Debug, Default)]
pub struct Email {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// A single attachment, carried as raw bytes until it is encoded into the
/// request document.
#[derive(Debug, Default)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
    /// Falls back to a generic binary type when unset.
    pub content_type: Option<String>,
    pub content_id: Option<String>,
    pub content_location: Option<String>,
    pub is_inline: bool,
    /// Stamped with the current time when unset.
    pub last_modified: Option<DateTime<Utc>>,
}
