//! Shared helpers for integration tests.
#![allow(dead_code)]

use qsense::Config;

/// Config pointing a driver at a mock server URI.
///
/// Goes through `Config::normalize` on purpose: the mock URI arrives as one
/// combined `scheme://host:port` string, exactly the input normalize exists
/// to split.
pub fn test_config(uri: &str) -> Config {
    let (scheme, host, port) = Config::normalize("https", uri, 4242, None).unwrap();
    Config::new(host).scheme(scheme).port(port)
}

/// A `WWW-Authenticate` value carrying a minimal NTLM Type 2 challenge.
pub fn ntlm_challenge_header() -> String {
    use base64::Engine;

    let mut type2 = vec![0u8; 48];
    type2[0..8].copy_from_slice(b"NTLMSSP\0");
    type2[8..12].copy_from_slice(&2u32.to_le_bytes());
    type2[24..32].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    format!(
        "NTLM {}",
        base64::engine::general_purpose::STANDARD.encode(&type2)
    )
}

/// Decode the NTLM message type out of an `Authorization` header value.
pub fn ntlm_message_type(authorization: &str) -> u32 {
    use base64::Engine;

    let token = authorization
        .strip_prefix("NTLM ")
        .expect("not an NTLM Authorization header");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .unwrap();
    u32::from_le_bytes(decoded[8..12].try_into().unwrap())
}

/// Run a blocking driver interaction off the async test runtime.
pub async fn blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}
