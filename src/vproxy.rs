//! Virtual-proxy path rewriting
//!
//! A Qlik Sense virtual proxy routes requests through a specific
//! authentication context on the server by prefixing the URL path with a
//! configured segment. The rewrite must be applied to the initial request URL
//! and to every redirect target, since the proxy's handshake redirects point
//! at un-prefixed paths.

use regex::{NoExpand, Regex};

use crate::errors::{QsenseError, Result};

/// A virtual-proxy rewrite rule: requests whose path matches `path` have the
/// match replaced by `template` with the prefix substituted in.
#[derive(Debug, Clone)]
pub struct VirtualProxy {
    prefix: String,
    path: Regex,
    rewrite: String,
}

impl VirtualProxy {
    /// Build a rule from a prefix, a path pattern and a template containing a
    /// `{}` placeholder for the prefix (e.g. `^/qrs/` and `/{}/qrs/`).
    pub fn new(prefix: &str, path_pattern: &str, template: &str) -> Result<Self> {
        let path = Regex::new(path_pattern).map_err(|e| {
            QsenseError::Argument(format!("invalid virtual-proxy pattern '{path_pattern}': {e}"))
        })?;
        Ok(Self {
            prefix: prefix.to_string(),
            path,
            rewrite: template.replace("{}", prefix),
        })
    }

    /// The standard rule for the repository service (`/qrs/...` paths).
    pub fn qrs(prefix: &str) -> Result<Self> {
        Self::new(prefix, "^/qrs/", "/{}/qrs/")
    }

    /// The standard rule for the proxy service (`/qps/...` paths).
    pub fn qps(prefix: &str) -> Result<Self> {
        Self::new(prefix, "^/qps/", "/{}/qps/")
    }

    /// The configured prefix, mirrored into `X-Qlik-Virtual-Proxy-Prefix`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Rewrite a URL path component through the rule. Paths that do not match
    /// the pattern pass through unchanged.
    pub fn rewrite_path(&self, path: &str) -> String {
        self.path
            .replace(path, NoExpand(&self.rewrite))
            .into_owned()
    }
}
