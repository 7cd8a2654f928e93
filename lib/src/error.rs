use std::error;
use std::fmt;

/// All possible ewsmail library errors.
///
/// `Config`, `Identity`, `Request` and `Xml` are raised before or while a
/// request is being built, so no bytes have been sent when they occur.
/// `Http` carries the connection-layer error as-is.
#[derive(Debug)]
pub enum Error {
    Config(String),
    Identity(String),
    Request(String),
    Xml(String),
    Http(reqwest::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Config(ref msg) => write!(f, "Config: {}", msg),
            Error::Identity(ref msg) => write!(f, "Identity: {}", msg),
            Error::Request(ref msg) => write!(f, "Request: {}", msg),
            Error::Xml(ref msg) => write!(f, "Xml: {}", msg),
            Error::Http(ref err) => write!(f, "Http: {}", err),
        }
    }
}

impl error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}
