//! NTLM challenge-response transport.
//!
//! Endpoints addressed with a `DOMAIN\account` identity negotiate NTLM at
//! the HTTP layer: a Type 1 (Negotiate) token is offered, the server answers
//! 401 with a Type 2 (Challenge) token, and the request is re-issued with a
//! Type 3 (Authenticate) token. The exchange runs with an empty password;
//! the bearer token on the authenticated leg carries the real credential.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};

use crate::error::Error;

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8] = b"NTLMSSP\0";

// Unicode | OEM | request target | NTLM | always sign | NTLM2 | 128 | 56
const NEGOTIATE_FLAGS: u32 = 0x0000_0001
    | 0x0000_0002
    | 0x0000_0004
    | 0x0000_0200
    | 0x0000_8000
    | 0x0008_0000
    | 0x2000_0000
    | 0x8000_0000;

pub struct NtlmTransport {
    domain: String,
    account: String,
    client: reqwest::Client,
}

impl NtlmTransport {
    pub fn new(domain: String, account: String, client: reqwest::Client) -> Self {
        Self {
            domain,
            account,
            client,
        }
    }

    /// POST `body` to `url`, negotiating NTLM along the way.
    ///
    /// The body is sent on both legs. A first response that is not a 401
    /// challenge is returned as-is, as is the final response whatever its
    /// status.
    pub async fn post(
        &self,
        url: reqwest::Url,
        headers: HeaderMap,
        body: String,
        bearer: Option<String>,
    ) -> Result<reqwest::Response, Error> {
        let mut first = headers.clone();
        first.insert(AUTHORIZATION, auth_value(&negotiate_message())?);

        log::debug!("NTLM negotiate as {}\\{}", self.domain, self.account);

        let resp = self
            .client
            .post(url.clone())
            .headers(first)
            .body(body.clone())
            .send()
            .await?;

        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let challenge = extract_challenge(resp.headers())?;
        let authenticate = authenticate_message(&self.domain, &self.account, "", &challenge)?;

        let mut second = headers;
        second.insert(AUTHORIZATION, auth_value(&authenticate)?);
        if let Some(bearer) = bearer {
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| Error::Request(format!("invalid bearer header: {}", e)))?;
            second.append(AUTHORIZATION, value);
        }

        let resp = self.client.post(url).headers(second).body(body).send().await?;
        Ok(resp)
    }
}

fn auth_value(token: &[u8]) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&format!("NTLM {}", base64::encode(token)))
        .map_err(|e| Error::Request(format!("invalid ntlm header: {}", e)))
}

/// Pull the Type 2 token out of the `WWW-Authenticate` response headers.
fn extract_challenge(headers: &HeaderMap) -> Result<Vec<u8>, Error> {
    for value in headers.get_all(WWW_AUTHENTICATE) {
        let value = match value.to_str() {
            Ok(v) => v.trim(),
            Err(_) => continue,
        };
        let token = value
            .strip_prefix("NTLM ")
            .or_else(|| value.strip_prefix("Negotiate "));
        if let Some(token) = token {
            return base64::decode(token.trim())
                .map_err(|e| Error::Request(format!("decode ntlm challenge failed: {}", e)));
        }
    }
    Err(Error::Request(
        "server did not return an NTLM challenge".to_string(),
    ))
}

/// NTLM Type 1 (Negotiate) message. Domain and workstation security buffers
/// are left empty.
fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());

    // Domain name buffer (empty)
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());

    // Workstation buffer (empty)
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());

    msg
}

/// NTLM Type 3 (Authenticate) message carrying an NTLMv2 response.
fn authenticate_message(
    domain: &str,
    account: &str,
    password: &str,
    challenge: &[u8],
) -> Result<Vec<u8>, Error> {
    // The 8-byte server challenge sits at a fixed offset in the Type 2
    // message
    if challenge.len() < 32 {
        return Err(Error::Request(
            "invalid ntlm challenge: message too short".to_string(),
        ));
    }
    let server_challenge = &challenge[24..32];

    // NT hash: MD4 over the UTF-16LE password
    let nt_hash = Md4::digest(&utf16le(password));

    // NTLMv2 hash: HMAC-MD5 keyed with the NT hash over UPPER(account) + domain
    let user_domain = format!("{}{}", account.to_uppercase(), domain);
    let mut mac = HmacMd5::new_from_slice(nt_hash.as_slice())
        .map_err(|e| Error::Request(format!("ntlm hmac: {}", e)))?;
    mac.update(&utf16le(&user_domain));
    let ntlmv2_hash = mac.finalize().into_bytes();

    // Blob: signature, timestamp, fresh client challenge
    let client_challenge: [u8; 8] = rand::random();
    let mut blob = Vec::new();
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    blob.extend_from_slice(&filetime_now().to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

    // NT proof: HMAC-MD5 over server challenge + blob
    let mut mac = HmacMd5::new_from_slice(ntlmv2_hash.as_slice())
        .map_err(|e| Error::Request(format!("ntlm hmac: {}", e)))?;
    mac.update(server_challenge);
    mac.update(&blob);
    let nt_proof = mac.finalize().into_bytes();

    let mut nt_response = nt_proof.as_slice().to_vec();
    nt_response.extend_from_slice(&blob);

    let domain_utf16 = utf16le(domain);
    let user_utf16 = utf16le(account);
    let ws_utf16 = utf16le(&workstation());

    let mut msg = Vec::new();
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());

    // Six security buffers and the flag word make up the fixed 64-byte
    // header; payloads follow in the order NT response, domain, user,
    // workstation
    let payload_offset: u32 = 64;
    let mut offset = payload_offset;

    // LM response (empty for NTLMv2)
    let lm_len = 0u16;
    msg.extend_from_slice(&lm_len.to_le_bytes());
    msg.extend_from_slice(&lm_len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    // NT response
    let nt_len = nt_response.len() as u16;
    offset += lm_len as u32;
    msg.extend_from_slice(&nt_len.to_le_bytes());
    msg.extend_from_slice(&nt_len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    // Domain
    let domain_len = domain_utf16.len() as u16;
    offset += nt_len as u32;
    msg.extend_from_slice(&domain_len.to_le_bytes());
    msg.extend_from_slice(&domain_len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    // User
    let user_len = user_utf16.len() as u16;
    offset += domain_len as u32;
    msg.extend_from_slice(&user_len.to_le_bytes());
    msg.extend_from_slice(&user_len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    // Workstation
    let ws_len = ws_utf16.len() as u16;
    offset += user_len as u32;
    msg.extend_from_slice(&ws_len.to_le_bytes());
    msg.extend_from_slice(&ws_len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    // Session key (empty)
    offset += ws_len as u32;
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());

    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());

    while msg.len() < payload_offset as usize {
        msg.push(0);
    }

    msg.extend_from_slice(&nt_response);
    msg.extend_from_slice(&domain_utf16);
    msg.extend_from_slice(&user_utf16);
    msg.extend_from_slice(&ws_utf16);

    Ok(msg)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes().to_vec()).collect()
}

fn workstation() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "WORKSTATION".to_string())
        .to_uppercase()
}

/// Current time in 100 ns intervals since 1601-01-01 (Windows FILETIME).
fn filetime_now() -> u64 {
    let unix_secs = chrono::Utc::now().timestamp() as u64;
    (unix_secs + 11_644_473_600) * 10_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_negotiate_message_layout() {
        let msg = negotiate_message();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[0..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 1);
        assert_eq!(
            u32::from_le_bytes([msg[12], msg[13], msg[14], msg[15]]),
            NEGOTIATE_FLAGS
        );
    }

    #[test]
    fn test_authenticate_message_layout() {
        let mut challenge = vec![0u8; 40];
        for (i, byte) in challenge[24..32].iter_mut().enumerate() {
            *byte = i as u8 + 1;
        }

        let msg = authenticate_message("CORP", "svc_account", "", &challenge).unwrap();

        assert_eq!(&msg[0..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 3);
        assert!(msg.len() > 64);
        // Domain and account ride along as UTF-16LE payloads
        assert!(contains(&msg[64..], &utf16le("CORP")));
        assert!(contains(&msg[64..], &utf16le("svc_account")));
    }

    #[test]
    fn test_authenticate_rejects_short_challenge() {
        let err = authenticate_message("CORP", "svc", "", &[0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_extract_challenge_schemes() {
        let token = base64::encode(&[1u8, 2, 3, 4]);

        for scheme in &["NTLM", "Negotiate"] {
            let mut headers = HeaderMap::new();
            headers.insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_str(&format!("{} {}", scheme, token)).unwrap(),
            );
            assert_eq!(extract_challenge(&headers).unwrap(), vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_extract_challenge_missing() {
        let err = extract_challenge(&HeaderMap::new()).unwrap_err();
        assert!(err.to_string().contains("challenge"));
    }
}
