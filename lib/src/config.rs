use serde::Deserialize;

use crate::error::Error;
use crate::ews::types::BodyType;

pub const DEFAULT_PATH: &str = "/etc/ewsmail/ewsmail.toml";
pub const DEFAULT_ENDPOINT: &str = "https://outlook.office365.com/EWS/Exchange.asmx";
const ENV_PREFIX: &str = "EWSMAIL";

/// Everything a send operation needs, passed explicitly instead of living in
/// process-wide state. Construct via `new` or `load`, then hand to
/// `Client::new`, which validates it.
///
/// Besides the three required values (sender identity, access token,
/// endpoint), this carries the named policy switches of the wire contract so
/// none of them is an invisible hard-coded behavior.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Mail address (`user@example.com`) or `DOMAIN\account` identity used
    /// to authenticate and to act as sender.
    pub sender: String,
    /// Bearer token for the EWS endpoint.
    pub access_token: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Content type declared for the message body.
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub request_read_receipt: bool,
    #[serde(default)]
    pub request_delivery_receipt: bool,
    /// When set, recipient mailboxes carry the same routing/mailbox type
    /// fields as the sender instead of relying on server defaults.
    #[serde(default)]
    pub qualify_recipients: bool,
    /// Skip TLS certificate verification. On by default to match the servers
    /// this client is deployed against; set to `false` to verify.
    #[serde(default = "default_true")]
    pub danger_accept_invalid_certs: bool,
    /// Attach the bearer header on the NTLM-authenticated request as well.
    #[serde(default = "default_true")]
    pub bearer_with_ntlm: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

impl Config {
    /// Configuration with the given identity and token and default policies.
    pub fn new(sender: &str, access_token: &str) -> Self {
        Self {
            sender: sender.to_string(),
            access_token: access_token.to_string(),
            endpoint: default_endpoint(),
            body_type: BodyType::default(),
            request_read_receipt: false,
            request_delivery_receipt: false,
            qualify_recipients: false,
            danger_accept_invalid_certs: true,
            bearer_with_ntlm: true,
            timeout_secs: default_timeout(),
        }
    }

    /// Loads config from the filesystem and merges it with any environment
    /// variables prefixed with EWSMAIL_.
    pub fn load(path: Option<&str>) -> Result<Self, Error> {
        let mut settings = config::Config::default();

        settings
            .merge(config::File::with_name(path.unwrap_or(DEFAULT_PATH)))
            .map_err(|e| Error::Config(format!("read config file: {}", e)))?
            .merge(config::Environment::with_prefix(ENV_PREFIX))
            .map_err(|e| Error::Config(format!("read environment: {}", e)))?;

        settings
            .try_into::<Config>()
            .map_err(|e| Error::Config(format!("parse config: {}", e)))
    }

    /// Ordered non-empty checks over the required values. Each failure names
    /// the missing field; the first failure wins.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sender.is_empty() {
            return Err(Error::Config(
                "empty sender, please provide a valid email or format with domain\\account"
                    .to_string(),
            ));
        }
        if self.endpoint.is_empty() {
            return Err(Error::Config(
                "empty ews address, please provide a valid server address".to_string(),
            ));
        }
        if self.access_token.is_empty() {
            return Err(Error::Config(
                "empty ews access token, please provide a valid access token".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("user@example.com", "token");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.body_type, BodyType::Html);
        assert_eq!(config.timeout_secs, 120);
        assert!(config.danger_accept_invalid_certs);
        assert!(config.bearer_with_ntlm);
        assert!(!config.request_read_receipt);
        assert!(!config.request_delivery_receipt);
        assert!(!config.qualify_recipients);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_order() {
        let mut config = Config::new("", "");
        config.endpoint = String::new();

        // Sender is reported first, then endpoint, then token
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty sender"));

        config.sender = "user@example.com".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty ews address"));

        config.endpoint = DEFAULT_ENDPOINT.to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty ews access token"));

        config.access_token = "token".to_string();
        assert!(config.validate().is_ok());
    }
}
