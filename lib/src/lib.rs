pub mod config;
pub mod email;
pub mod error;
pub mod ews;

pub use config::Config;
pub use email::{Attachment, Email};
pub use error::Error;
pub use ews::Client;
