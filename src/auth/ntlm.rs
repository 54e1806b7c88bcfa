//! NTLM challenge-response authentication
//!
//! The proxy service accepts NTLM as an alternative to certificate
//! authentication. The flow is the standard three-message exchange:
//!
//! 1. the client offers a Type 1 (Negotiate) message,
//! 2. the server answers 401 with a Type 2 (Challenge) message,
//! 3. the client resends with a Type 3 (Authenticate) message.
//!
//! Only NTLMv2 responses are produced.

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};

use super::AuthError;

const NTLM_NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NTLM_NEGOTIATE_OEM: u32 = 0x0000_0002;
const NTLM_REQUEST_TARGET: u32 = 0x0000_0004;
const NTLM_NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NTLM_NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NTLM_NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NTLM_NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NTLM_NEGOTIATE_128: u32 = 0x2000_0000;
const NTLM_NEGOTIATE_56: u32 = 0x8000_0000;

/// NTLM credentials. The username may carry the domain as `DOMAIN\user`.
#[derive(Debug, Clone)]
pub struct NtlmAuth {
    username: String,
    password: String,
    domain: Option<String>,
}

/// Parsed Type 2 (Challenge) message from the server.
#[derive(Debug)]
pub struct Type2Message {
    /// Server challenge nonce
    pub server_challenge: [u8; 8],
    /// Negotiate flags echoed by the server
    pub flags: u32,
    /// Target info blob (AV_PAIRs), required for NTLMv2
    pub target_info: Option<Vec<u8>>,
}

impl NtlmAuth {
    /// Username formats: `user`, `DOMAIN\user` or `user@domain`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let raw = username.into();
        let (username, domain) = split_domain(&raw);
        Self {
            username,
            password: password.into(),
            domain,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Set the Type 1 (Negotiate) Authorization header, opening the
    /// handshake. Re-applied on every redirect hop so each target sees a
    /// fresh negotiation.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), AuthError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(type1_message());
        let value = HeaderValue::from_str(&format!("NTLM {encoded}"))
            .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Answer a Type 2 challenge with a Type 3 Authorization header.
    pub fn authenticate_header(&self, type2: &Type2Message) -> Result<HeaderValue, AuthError> {
        let type3 = self.type3_message(type2)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(type3);
        HeaderValue::from_str(&format!("NTLM {encoded}"))
            .map_err(|e| AuthError::InvalidHeader(e.to_string()))
    }

    fn type3_message(&self, type2: &Type2Message) -> Result<Vec<u8>, AuthError> {
        use rand::RngCore;

        let mut client_challenge = [0u8; 8];
        rand::rng().fill_bytes(&mut client_challenge);

        let (nt_response, lm_response) = self.ntlmv2_response(
            &type2.server_challenge,
            &client_challenge,
            type2.target_info.as_deref(),
        )?;

        let domain_bytes = to_utf16le(self.domain.as_deref().unwrap_or(""));
        let username_bytes = to_utf16le(&self.username);
        let workstation_bytes: Vec<u8> = Vec::new();

        // Payload offsets; the Type 3 fixed header is 64 bytes.
        let lm_offset: u32 = 64;
        let nt_offset = lm_offset + lm_response.len() as u32;
        let domain_offset = nt_offset + nt_response.len() as u32;
        let username_offset = domain_offset + domain_bytes.len() as u32;
        let workstation_offset = username_offset + username_bytes.len() as u32;

        let mut msg = Vec::with_capacity(256);
        msg.extend_from_slice(b"NTLMSSP\0");
        msg.extend_from_slice(&3u32.to_le_bytes());

        for (payload, offset) in [
            (&lm_response, lm_offset),
            (&nt_response, nt_offset),
            (&domain_bytes, domain_offset),
            (&username_bytes, username_offset),
            (&workstation_bytes, workstation_offset),
        ] {
            push_security_buffer(&mut msg, payload.len(), offset);
        }

        // Session key buffer (empty) and flags echoed from the server
        push_security_buffer(&mut msg, 0, workstation_offset + workstation_bytes.len() as u32);
        msg.extend_from_slice(&type2.flags.to_le_bytes());

        msg.extend_from_slice(&lm_response);
        msg.extend_from_slice(&nt_response);
        msg.extend_from_slice(&domain_bytes);
        msg.extend_from_slice(&username_bytes);
        msg.extend_from_slice(&workstation_bytes);

        Ok(msg)
    }

    fn ntlmv2_response(
        &self,
        server_challenge: &[u8; 8],
        client_challenge: &[u8; 8],
        target_info: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
        use hmac::{Hmac, Mac};
        use md4::{Digest as Md4Digest, Md4};
        use md5_digest::Md5;

        type HmacMd5 = Hmac<Md5>;

        // NT hash = MD4(UTF16LE(password))
        let mut md4 = Md4::new();
        md4.update(to_utf16le(&self.password));
        let nt_hash = md4.finalize();

        // NTLMv2 hash = HMAC-MD5(NT hash, UPPER(user) + domain)
        let user_domain = format!(
            "{}{}",
            self.username.to_uppercase(),
            self.domain.as_deref().unwrap_or("")
        );
        let mut mac = HmacMd5::new_from_slice(&nt_hash)
            .map_err(|e| AuthError::InvalidCredentials(format!("HMAC error: {e}")))?;
        mac.update(&to_utf16le(&user_domain));
        let ntlmv2_hash = mac.finalize().into_bytes();

        // Temporal blob carrying timestamp, client nonce and target info
        let mut blob = Vec::with_capacity(32 + target_info.map_or(0, <[u8]>::len));
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        blob.extend_from_slice(&[0x00; 4]);
        blob.extend_from_slice(&filetime_now());
        blob.extend_from_slice(client_challenge);
        blob.extend_from_slice(&[0x00; 4]);
        if let Some(info) = target_info {
            blob.extend_from_slice(info);
        }
        blob.extend_from_slice(&[0x00; 4]);

        // NT response = HMAC-MD5(NTLMv2 hash, server challenge + blob) + blob
        let mut mac = HmacMd5::new_from_slice(&ntlmv2_hash)
            .map_err(|e| AuthError::InvalidCredentials(format!("HMAC error: {e}")))?;
        mac.update(server_challenge);
        mac.update(&blob);
        let nt_proof = mac.finalize().into_bytes();
        let mut nt_response = Vec::with_capacity(16 + blob.len());
        nt_response.extend_from_slice(&nt_proof);
        nt_response.extend_from_slice(&blob);

        // LM response = HMAC-MD5(NTLMv2 hash, challenges) + client challenge
        let mut mac = HmacMd5::new_from_slice(&ntlmv2_hash)
            .map_err(|e| AuthError::InvalidCredentials(format!("HMAC error: {e}")))?;
        mac.update(server_challenge);
        mac.update(client_challenge);
        let lm_proof = mac.finalize().into_bytes();
        let mut lm_response = Vec::with_capacity(24);
        lm_response.extend_from_slice(&lm_proof);
        lm_response.extend_from_slice(client_challenge);

        Ok((nt_response, lm_response))
    }
}

/// Build the fixed Type 1 (Negotiate) message.
fn type1_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&1u32.to_le_bytes());

    let flags: u32 = NTLM_NEGOTIATE_UNICODE
        | NTLM_NEGOTIATE_OEM
        | NTLM_REQUEST_TARGET
        | NTLM_NEGOTIATE_NTLM
        | NTLM_NEGOTIATE_ALWAYS_SIGN
        | NTLM_NEGOTIATE_EXTENDED_SESSIONSECURITY
        | NTLM_NEGOTIATE_TARGET_INFO
        | NTLM_NEGOTIATE_128
        | NTLM_NEGOTIATE_56;
    msg.extend_from_slice(&flags.to_le_bytes());

    // Empty domain and workstation security buffers
    push_security_buffer(&mut msg, 0, 0);
    push_security_buffer(&mut msg, 0, 0);
    msg
}

/// Append a security buffer descriptor (length, max length, offset).
fn push_security_buffer(msg: &mut Vec<u8>, len: usize, offset: u32) {
    msg.extend_from_slice(&(len as u16).to_le_bytes());
    msg.extend_from_slice(&(len as u16).to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

fn split_domain(username: &str) -> (String, Option<String>) {
    if let Some((domain, user)) = username.split_once('\\') {
        return (user.to_string(), Some(domain.to_string()));
    }
    if let Some((user, domain)) = username.split_once('@') {
        return (user.to_string(), Some(domain.to_string()));
    }
    (username.to_string(), None)
}

fn to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Current time as a Windows FILETIME (100ns intervals since 1601-01-01).
fn filetime_now() -> [u8; 8] {
    use std::time::{SystemTime, UNIX_EPOCH};

    const EPOCH_DIFF: u64 = 116_444_736_000_000_000;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let filetime = now.as_secs() * 10_000_000 + u64::from(now.subsec_nanos()) / 100 + EPOCH_DIFF;
    filetime.to_le_bytes()
}

/// Parse a raw Type 2 (Challenge) message.
pub fn parse_type2_message(data: &[u8]) -> Result<Type2Message, AuthError> {
    if data.len() < 32 {
        return Err(AuthError::InvalidChallenge(
            "Type 2 message too short".to_string(),
        ));
    }
    if &data[0..8] != b"NTLMSSP\0" {
        return Err(AuthError::InvalidChallenge(
            "invalid NTLM signature".to_string(),
        ));
    }
    let msg_type = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if msg_type != 2 {
        return Err(AuthError::InvalidChallenge(format!(
            "expected Type 2 message, got Type {msg_type}"
        )));
    }

    let flags = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);

    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&data[24..32]);

    // Target info security buffer sits at offset 40 when advertised
    let target_info = if data.len() >= 48 && (flags & NTLM_NEGOTIATE_TARGET_INFO) != 0 {
        let len = u16::from_le_bytes([data[40], data[41]]) as usize;
        let offset = u32::from_le_bytes([data[44], data[45], data[46], data[47]]) as usize;
        if len > 0 && offset + len <= data.len() {
            Some(data[offset..offset + len].to_vec())
        } else {
            None
        }
    } else {
        None
    };

    Ok(Type2Message {
        server_challenge,
        flags,
        target_info,
    })
}

/// Extract an NTLM Type 2 challenge from a 401's WWW-Authenticate header.
pub fn challenge_from_headers(headers: &HeaderMap) -> Result<Type2Message, AuthError> {
    let auth_header = headers
        .get(WWW_AUTHENTICATE)
        .ok_or_else(|| AuthError::InvalidChallenge("no WWW-Authenticate header".to_string()))?
        .to_str()
        .map_err(|_| AuthError::InvalidChallenge("unreadable WWW-Authenticate header".to_string()))?;

    let token = auth_header
        .strip_prefix("NTLM ")
        .ok_or_else(|| AuthError::InvalidChallenge("WWW-Authenticate is not NTLM".to_string()))?
        .trim();

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|e| AuthError::InvalidChallenge(format!("base64 decode error: {e}")))?;

    parse_type2_message(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_domain_backslash() {
        let auth = NtlmAuth::new("DOMAIN\\user", "pass");
        assert_eq!(auth.username(), "user");
        assert_eq!(auth.domain(), Some("DOMAIN"));
    }

    #[test]
    fn test_split_domain_at() {
        let auth = NtlmAuth::new("user@domain.com", "pass");
        assert_eq!(auth.username(), "user");
        assert_eq!(auth.domain(), Some("domain.com"));
    }

    #[test]
    fn test_plain_username() {
        let auth = NtlmAuth::new("user", "pass");
        assert_eq!(auth.username(), "user");
        assert_eq!(auth.domain(), None);
    }

    #[test]
    fn test_type1_header() {
        let auth = NtlmAuth::new("user", "pass");
        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();

        let value = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(value.starts_with("NTLM "));

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&value[5..])
            .unwrap();
        assert_eq!(&decoded[0..8], b"NTLMSSP\0");
        let msg_type = u32::from_le_bytes([decoded[8], decoded[9], decoded[10], decoded[11]]);
        assert_eq!(msg_type, 1);
    }

    #[test]
    fn test_parse_type2_message() {
        let mut type2 = vec![0u8; 56];
        type2[0..8].copy_from_slice(b"NTLMSSP\0");
        type2[8..12].copy_from_slice(&2u32.to_le_bytes());
        type2[20..24]
            .copy_from_slice(&(NTLM_NEGOTIATE_UNICODE | NTLM_NEGOTIATE_NTLM).to_le_bytes());
        type2[24..32].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let parsed = parse_type2_message(&type2).unwrap();
        assert_eq!(parsed.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(parsed.target_info.is_none());
    }

    #[test]
    fn test_parse_type2_rejects_wrong_type() {
        let mut msg = vec![0u8; 32];
        msg[0..8].copy_from_slice(b"NTLMSSP\0");
        msg[8..12].copy_from_slice(&1u32.to_le_bytes());
        assert!(parse_type2_message(&msg).is_err());
    }

    #[test]
    fn test_type3_framing() {
        let auth = NtlmAuth::new("CORP\\user", "password");
        let type2 = Type2Message {
            server_challenge: [1, 2, 3, 4, 5, 6, 7, 8],
            flags: NTLM_NEGOTIATE_UNICODE | NTLM_NEGOTIATE_NTLM,
            target_info: None,
        };

        let type3 = auth.type3_message(&type2).unwrap();
        assert_eq!(&type3[0..8], b"NTLMSSP\0");
        let msg_type = u32::from_le_bytes([type3[8], type3[9], type3[10], type3[11]]);
        assert_eq!(msg_type, 3);
    }

    #[test]
    fn test_challenge_from_headers_rejects_basic() {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"x\""));
        assert!(challenge_from_headers(&headers).is_err());
    }

    #[test]
    fn test_utf16le_encoding() {
        assert_eq!(
            to_utf16le("test"),
            vec![0x74, 0x00, 0x65, 0x00, 0x73, 0x00, 0x74, 0x00]
        );
    }
}
