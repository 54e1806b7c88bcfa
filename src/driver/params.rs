//! Query-parameter and header construction
//!
//! Every call gets a fresh 16-character alphanumeric anti-CSRF token
//! (`Xrfkey`), present both in the query string and in the `x-Qlik-Xrfkey`
//! header. The server rejects requests where the two disagree.

use rand::{distr::Alphanumeric, Rng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, PRAGMA, USER_AGENT};
use tracing::debug;

use crate::errors::{QsenseError, Result};
use crate::identity::Identity;
use crate::vproxy::VirtualProxy;

pub const USER_AGENT_STRING: &str = concat!(
    "Mozilla/5.0 (Windows NT 6.3; Win64; x64) qsense/",
    env!("CARGO_PKG_VERSION"),
    " APIREST (QSense)"
);

pub(crate) const HDR_QLIK_USER: HeaderName = HeaderName::from_static("x-qlik-user");
pub(crate) const HDR_XRFKEY: HeaderName = HeaderName::from_static("x-qlik-xrfkey");
pub(crate) const HDR_VPROXY_PREFIX: HeaderName =
    HeaderName::from_static("x-qlik-virtual-proxy-prefix");

const XRFKEY_LEN: usize = 16;

/// A single query-parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Bool(true) => "true".to_string(),
            ParamValue::Bool(false) => "false".to_string(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Logical request parameters.
///
/// An entry set to `None` means "use the server default" and is dropped from
/// the outgoing query string.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, Option<ParamValue>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.entries.push((key.into(), Some(value.into())));
        self
    }

    pub fn set_opt<V: Into<ParamValue>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        self.entries.push((key.into(), value.map(Into::into)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Generate a fresh anti-CSRF token.
fn xrfkey() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(XRFKEY_LEN)
        .map(char::from)
        .collect()
}

/// Build the query parameters and headers for one request.
///
/// The returned query always leads with a new `Xrfkey`; the headers mirror
/// the token and carry the impersonation identity. Entries in `extra`
/// override the defaults (uploads override `Content-Type`).
pub(crate) fn prepare(
    identity: &Identity,
    vproxy: Option<&VirtualProxy>,
    params: &Params,
    extra: &HeaderMap,
) -> Result<(Vec<(String, String)>, HeaderMap)> {
    let key = xrfkey();

    let mut query = vec![("Xrfkey".to_string(), key.clone())];
    for (name, value) in &params.entries {
        match value {
            Some(v) => {
                let rendered = v.render();
                debug!(param = %name, value = %rendered, "query parameter");
                query.push((name.clone(), rendered));
            }
            None => debug!(param = %name, "query parameter left to server default"),
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        HDR_QLIK_USER,
        HeaderValue::from_str(&identity.header_value())
            .map_err(|e| QsenseError::Argument(format!("invalid identity header: {e}")))?,
    );
    headers.insert(
        HDR_XRFKEY,
        HeaderValue::from_str(&key)
            .map_err(|e| QsenseError::Argument(format!("invalid Xrfkey header: {e}")))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(vp) = vproxy {
        headers.insert(
            HDR_VPROXY_PREFIX,
            HeaderValue::from_str(vp.prefix())
                .map_err(|e| QsenseError::Argument(format!("invalid proxy prefix: {e}")))?,
        );
    }
    for (name, value) in extra.iter() {
        headers.insert(name.clone(), value.clone());
    }

    Ok((query, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare_default(params: &Params) -> (Vec<(String, String)>, HeaderMap) {
        prepare(&Identity::default(), None, params, &HeaderMap::new()).unwrap()
    }

    #[test]
    fn test_xrfkey_is_16_alphanumeric() {
        let key = xrfkey();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_xrfkey_not_reused() {
        assert_ne!(xrfkey(), xrfkey());
    }

    #[test]
    fn test_token_mirrored_in_header_and_query() {
        let (query, headers) = prepare_default(&Params::new());
        let (name, token) = &query[0];
        assert_eq!(name, "Xrfkey");
        assert_eq!(headers.get(HDR_XRFKEY).unwrap().to_str().unwrap(), token);
    }

    #[test]
    fn test_bool_serializes_lowercase() {
        let params = Params::new().set("skipData", true).set("keepdata", false);
        let (query, _) = prepare_default(&params);
        assert!(query.contains(&("skipData".to_string(), "true".to_string())));
        assert!(query.contains(&("keepdata".to_string(), "false".to_string())));
    }

    #[test]
    fn test_none_values_dropped() {
        let params = Params::new().set_opt::<&str>("filter", None).set("name", "app");
        let (query, _) = prepare_default(&params);
        assert!(!query.iter().any(|(k, _)| k == "filter"));
        assert!(query.contains(&("name".to_string(), "app".to_string())));
    }

    #[test]
    fn test_default_headers_present() {
        let (_, headers) = prepare_default(&Params::new());
        assert_eq!(headers.get(PRAGMA).unwrap(), "no-cache");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(
            headers.get(HDR_QLIK_USER).unwrap().to_str().unwrap(),
            "UserDirectory=internal; UserId=sa_repository"
        );
        assert!(headers.get(HDR_VPROXY_PREFIX).is_none());
    }

    #[test]
    fn test_vproxy_prefix_header() {
        let vp = VirtualProxy::qrs("myproxy").unwrap();
        let (_, headers) =
            prepare(&Identity::default(), Some(&vp), &Params::new(), &HeaderMap::new()).unwrap();
        assert_eq!(headers.get(HDR_VPROXY_PREFIX).unwrap(), "myproxy");
    }

    #[test]
    fn test_extra_headers_override_defaults() {
        let mut extra = HeaderMap::new();
        extra.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.qlik.sense.app"),
        );
        let (_, headers) =
            prepare(&Identity::default(), None, &Params::new(), &extra).unwrap();
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/vnd.qlik.sense.app"
        );
    }
}
