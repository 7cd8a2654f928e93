//! CreateItem dispatch: SOAP framing, transport selection and the
//! authenticated POST.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::Config;
use crate::email::Email;
use crate::error::Error;
use crate::ews::ntlm::NtlmTransport;
use crate::ews::types::CreateItem;

/// Routing hint understood by the Exchange front end.
const ANCHOR_MAILBOX_HEADER: &str = "X-AnchorMailbox";
const TEXT_XML_UTF8: &str = "text/xml; charset=utf-8";

/// Marker substituted with the connecting identity before dispatch.
const SENDER_PLACEHOLDER: &str = "[sender-placeholder]";

/// Fixed SOAP frame around the CreateItem body. The namespace set, server
/// version marker and time-zone context are part of the wire contract.
const SOAP_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<s:Envelope
    xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages"
    xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
    <s:Header>
        <t:RequestServerVersion Version="Exchange2016"/>
        <t:ExchangeImpersonation>
            <t:ConnectingSID>
                <t:PrimarySmtpAddress>[sender-placeholder]</t:PrimarySmtpAddress>
            </t:ConnectingSID>
        </t:ExchangeImpersonation>
        <t:TimeZoneContext>
            <t:TimeZoneDefinition Id="China Standard Time"/>
        </t:TimeZoneContext>
    </s:Header>
    <s:Body>
"#;

const SOAP_FOOTER: &str = "\n    </s:Body>\n</s:Envelope>";

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();
}

/// How the configured sender authenticates, decided by its syntactic shape.
#[derive(Debug, PartialEq)]
pub enum Identity {
    /// Plain mail address; the bearer token authenticates on its own.
    Smtp(String),
    /// `DOMAIN\account`; NTLM is negotiated at the HTTP layer.
    DomainAccount { domain: String, account: String },
}

impl Identity {
    pub fn parse(sender: &str) -> Result<Self, Error> {
        if EMAIL_RE.is_match(sender) {
            return Ok(Identity::Smtp(sender.to_string()));
        }

        let mut parts = sender.splitn(2, '\\');
        match (parts.next(), parts.next()) {
            (Some(domain), Some(account)) if !domain.is_empty() && !account.is_empty() => {
                Ok(Identity::DomainAccount {
                    domain: domain.to_string(),
                    account: account.to_string(),
                })
            }
            _ => Err(Error::Identity(
                "wrong format of username, not email or format with domain\\account".to_string(),
            )),
        }
    }
}

/// Embed a serialized CreateItem document in the SOAP envelope, substituting
/// the connecting identity.
fn wrap_envelope(sender: &str, body: &str) -> String {
    let mut envelope = SOAP_HEADER.replace(SENDER_PLACEHOLDER, sender);
    envelope.push_str(body);
    envelope.push_str(SOAP_FOOTER);
    envelope
}

/// EWS CreateItem client.
///
/// Holds a validated configuration; every send builds a fresh request and
/// performs a single round-trip. The returned response is handed back as-is:
/// a non-2xx status or a SOAP fault in the body is the caller's to inspect,
/// not an error here, and nothing is ever retried.
#[derive(Debug)]
pub struct Client {
    config: Config,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send a single mail through the CreateItem operation.
    ///
    /// The sender comes from the configuration; the message is sent and a
    /// copy saved to the sent-items folder.
    pub async fn send_mail(&self, mail: Email) -> Result<reqwest::Response, Error> {
        self.config.validate()?;

        let request = CreateItem::mail(&self.config.sender, mail, &self.config);
        let body = request.to_xml()?;

        self.issue(&self.config.endpoint, &body).await
    }

    /// Issue a pre-built CreateItem body against an explicit endpoint.
    ///
    /// Preconditions are re-checked here so the operation still fails before
    /// any bytes are sent when called directly.
    pub async fn issue(&self, ews_addr: &str, body: &str) -> Result<reqwest::Response, Error> {
        if self.config.sender.is_empty() {
            return Err(Error::Config(
                "empty sender, please provide a valid email or format with domain\\account"
                    .to_string(),
            ));
        }
        if ews_addr.is_empty() {
            return Err(Error::Config(
                "empty ews address, please provide a valid server address".to_string(),
            ));
        }
        if self.config.access_token.is_empty() {
            return Err(Error::Config(
                "empty ews access token, please provide a valid access token".to_string(),
            ));
        }

        let identity = Identity::parse(&self.config.sender)?;
        let url = reqwest::Url::parse(ews_addr)
            .map_err(|e| Error::Request(format!("invalid server address {:?}: {}", ews_addr, e)))?;

        let envelope = wrap_envelope(&self.config.sender, body);
        let headers = self.base_headers()?;
        let bearer = format!("Bearer {}", self.config.access_token);

        log::info!("Sending CreateItem request to {}", ews_addr);

        match identity {
            Identity::Smtp(_) => {
                let client = self.http_client()?;
                let resp = client
                    .post(url)
                    .headers(headers)
                    .header(AUTHORIZATION, bearer)
                    .body(envelope)
                    .send()
                    .await?;
                Ok(resp)
            }
            Identity::DomainAccount { domain, account } => {
                let transport = NtlmTransport::new(domain, account, self.http_client()?);
                let bearer = if self.config.bearer_with_ntlm {
                    Some(bearer)
                } else {
                    None
                };
                transport.post(url, headers, envelope, bearer).await
            }
        }
    }

    fn base_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_XML_UTF8));

        let anchor = HeaderName::from_bytes(ANCHOR_MAILBOX_HEADER.as_bytes())
            .map_err(|e| Error::Request(format!("invalid anchor mailbox header: {}", e)))?;
        let value = HeaderValue::from_str(&self.config.sender)
            .map_err(|e| Error::Request(format!("invalid sender for anchor mailbox: {}", e)))?;
        headers.insert(anchor, value);

        Ok(headers)
    }

    fn http_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(self.config.danger_accept_invalid_certs)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Request(format!("build http client failed: {}", e)))
    }
}
