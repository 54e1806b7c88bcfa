//! Request execution
//!
//! [`RequestDriver`] is the single path every QPS/QRS operation goes
//! through: it normalizes parameters, builds the impersonation and anti-CSRF
//! headers, rewrites URLs through the virtual proxy, and follows the proxy's
//! authentication-redirect handshake by hand.
//!
//! Redirects are disabled at the transport. The vendor proxy answers
//! NTLM/ticket authentication with a 3xx chain, and letting the client follow
//! it automatically would drop the `X-Qlik-User` and `x-Qlik-Xrfkey` headers
//! and the virtual-proxy path prefix on the follow-up request, breaking the
//! handshake. Each hop is therefore re-signed and re-rewritten explicitly.

mod params;
mod transfer;

pub use params::{ParamValue, Params, USER_AGENT_STRING};
pub use transfer::{ChunkedReader, FileChunks};

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use url::Url;

use crate::auth::{challenge_from_headers, NtlmAuth};
use crate::config::Config;
use crate::errors::{QsenseError, Result};
use crate::identity::Identity;
use crate::vproxy::VirtualProxy;

/// MIME type the repository expects for app binary payloads.
pub const APP_CONTENT_TYPE: &str = "application/vnd.qlik.sense.app";

/// Body of a [`RequestDriver::call`] request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(JsonValue),
    Raw(Vec<u8>),
}

/// A multipart attachment. Kept as a path rather than bytes so redirect hops
/// can rebuild the form by reopening the file.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub field: String,
    pub path: PathBuf,
}

impl Attachment {
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }
}

/// Final, non-redirect response of a driver operation.
///
/// The driver does not interpret 4xx/5xx statuses; callers check
/// [`ok`](Self::ok) or [`status`](Self::status) themselves.
#[derive(Debug)]
pub struct Outcome {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl Outcome {
    fn read(response: Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes()?;
        Ok(Self {
            status,
            headers,
            url,
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Raw body bytes. Empty for [`RequestDriver::download`], whose body was
    /// streamed to disk instead.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }
}

/// The session-owning request executor shared by all API surfaces.
///
/// One driver owns one HTTP session (connection pool, cookie jar, TLS
/// context). It is synchronous and not meant for concurrent use from
/// multiple threads; use one driver per thread or serialize access.
pub struct RequestDriver {
    client: Client,
    base_url: Url,
    user: Identity,
    vproxy: Option<VirtualProxy>,
    ntlm: Option<NtlmAuth>,
    chunk_size: usize,
    max_redirects: u32,
}

impl RequestDriver {
    /// Build the HTTP session from an immutable configuration.
    ///
    /// NTLM is enabled when no client certificate is configured and the
    /// identity carries a password; the two transport credentials are
    /// mutually exclusive.
    pub fn new(config: Config) -> Result<Self> {
        let base_url = Url::parse(&config.base_url())?;

        let mut builder = Client::builder()
            .user_agent(USER_AGENT_STRING)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .referer(false);
        builder = config.tls().apply_to_builder(builder)?;
        let client = builder.build()?;

        let ntlm = if config.certificate.is_none() {
            config.user.password.as_deref().map(|password| {
                debug!("NTLM authentication enabled");
                NtlmAuth::new(config.user.ntlm_username(), password)
            })
        } else {
            None
        };

        Ok(Self {
            client,
            base_url,
            user: config.user,
            vproxy: config.vproxy,
            ntlm,
            chunk_size: config.chunk_size,
            max_redirects: config.max_redirects,
        })
    }

    /// Replace the impersonated identity. All three fields change together.
    ///
    /// Transport-level credentials (certificate or NTLM) are fixed at
    /// construction; this only affects the `X-Qlik-User` header on
    /// subsequent calls.
    pub fn set_user(
        &mut self,
        directory: impl Into<String>,
        user_id: impl Into<String>,
        password: Option<String>,
    ) {
        self.user = Identity {
            directory: directory.into(),
            user_id: user_id.into(),
            password,
        };
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Generic JSON request through the full authentication pipeline.
    ///
    /// `method` must be one of GET/POST/PUT/DELETE. Attachments switch the
    /// request to multipart/form-data.
    pub fn call(
        &self,
        method: &str,
        apipath: &str,
        params: &Params,
        body: RequestBody,
        attachments: &[Attachment],
    ) -> Result<Outcome> {
        let method = parse_method(method)?;
        info!(method = %method, path = apipath, "api call");

        let (query, headers) =
            params::prepare(&self.user, self.vproxy.as_ref(), params, &HeaderMap::new())?;

        let url = self.finalize_url(self.base_url.join(apipath)?, &query)?;
        debug!(url = %url, "send");

        let mut response = self.send(method.clone(), url, headers.clone(), &body, attachments)?;

        // Manual redirect chain: each hop re-applies the impersonation and
        // CSRF headers and the virtual-proxy rewrite, and re-merges the
        // original query parameters over whatever the target carries.
        let mut hops = 0u32;
        let mut current_method = method;
        let mut current_body = body;
        let mut current_headers = headers;
        let mut attachments = attachments;
        while response.status().is_redirection() {
            hops += 1;
            if hops > self.max_redirects {
                return Err(QsenseError::TooManyRedirects(self.max_redirects));
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
            else {
                break;
            };
            let next_url = self.finalize_url(response.url().join(&location)?, &query)?;

            // 301/302/303 downgrade POST to GET and lose the body
            if matches!(response.status().as_u16(), 301 | 302 | 303)
                && current_method == Method::POST
            {
                current_method = Method::GET;
                current_body = RequestBody::Empty;
                current_headers.remove(CONTENT_TYPE);
                attachments = &[];
            }

            debug!(url = %next_url, hop = hops, "redirect");
            response = self.send(
                current_method.clone(),
                next_url,
                current_headers.clone(),
                &current_body,
                attachments,
            )?;
        }

        Outcome::read(response)
    }

    pub fn get(&self, apipath: &str, params: &Params) -> Result<Outcome> {
        self.call("GET", apipath, params, RequestBody::Empty, &[])
    }

    pub fn post(&self, apipath: &str, params: &Params, body: RequestBody) -> Result<Outcome> {
        self.call("POST", apipath, params, body, &[])
    }

    pub fn put(&self, apipath: &str, params: &Params, body: RequestBody) -> Result<Outcome> {
        self.call("PUT", apipath, params, body, &[])
    }

    pub fn delete(&self, apipath: &str, params: &Params) -> Result<Outcome> {
        self.call("DELETE", apipath, params, RequestBody::Empty, &[])
    }

    /// Streamed GET written straight to `filename` in chunk-size blocks.
    ///
    /// Single hop; the body never sits in memory. A partially written file
    /// is left in place on error.
    pub fn download(
        &self,
        apipath: &str,
        filename: impl AsRef<Path>,
        params: &Params,
    ) -> Result<Outcome> {
        let filename = filename.as_ref();
        info!(path = apipath, "api download");

        let (query, headers) =
            params::prepare(&self.user, self.vproxy.as_ref(), params, &HeaderMap::new())?;
        let url = self.finalize_url(self.base_url.join(apipath)?, &query)?;
        debug!(url = %url, "send");

        let response = self.send(Method::GET, url, headers, &RequestBody::Empty, &[])?;

        let status = response.status();
        let resp_headers = response.headers().clone();
        let final_url = response.url().clone();

        debug!(block_size = self.chunk_size, file = %filename.display(), "downloading");
        let mut file = File::create(filename)?;
        let written = transfer::drain(ChunkedReader::new(response, self.chunk_size), &mut file)?;
        info!(bytes = written, file = %filename.display(), "saved");

        Ok(Outcome {
            status,
            headers: resp_headers,
            url: final_url,
            body: Bytes::new(),
        })
    }

    /// Streamed POST of `filename` in chunk-size blocks.
    ///
    /// The body reports its total size up front so the transport sends
    /// Content-Length rather than chunked encoding, which the repository
    /// rejects for app uploads.
    pub fn upload(
        &self,
        apipath: &str,
        filename: impl AsRef<Path>,
        params: &Params,
    ) -> Result<Outcome> {
        let filename = filename.as_ref();
        info!(path = apipath, "api upload");

        let mut extra = HeaderMap::new();
        extra.insert(CONTENT_TYPE, HeaderValue::from_static(APP_CONTENT_TYPE));
        let (query, mut headers) =
            params::prepare(&self.user, self.vproxy.as_ref(), params, &extra)?;
        if let Some(ntlm) = &self.ntlm {
            ntlm.apply(&mut headers)
                .map_err(|e| QsenseError::Auth(e.to_string()))?;
        }
        let url = self.finalize_url(self.base_url.join(apipath)?, &query)?;
        debug!(url = %url, "send");

        let chunks = FileChunks::open(filename, self.chunk_size)?;
        let total = chunks.total_len();
        info!(bytes = total, "uploading");

        let mut response = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .body(reqwest::blocking::Body::sized(chunks, total))
            .send()?;

        // The streamed body is not replayable; answering a challenge means
        // reopening the file and streaming it again.
        if let Some(ntlm) = &self.ntlm {
            if response.status() == StatusCode::UNAUTHORIZED {
                if let Ok(challenge) = challenge_from_headers(response.headers()) {
                    debug!("answering NTLM challenge");
                    let mut retry_headers = headers;
                    retry_headers.insert(
                        AUTHORIZATION,
                        ntlm.authenticate_header(&challenge)
                            .map_err(|e| QsenseError::Auth(e.to_string()))?,
                    );
                    let chunks = FileChunks::open(filename, self.chunk_size)?;
                    let total = chunks.total_len();
                    response = self
                        .client
                        .post(url)
                        .headers(retry_headers)
                        .body(reqwest::blocking::Body::sized(chunks, total))
                        .send()?;
                }
            }
        }
        info!("upload done");

        Outcome::read(response)
    }

    /// Rewrite the URL path through the virtual proxy and merge the prepared
    /// query parameters over any already present.
    ///
    /// Parameters embedded in the URL (typically by a redirect target) are
    /// preserved; the prepared parameters win on key collision so the chain
    /// keeps one consistent Xrfkey.
    fn finalize_url(&self, mut url: Url, query: &[(String, String)]) -> Result<Url> {
        if let Some(vp) = &self.vproxy {
            let rewritten = vp.rewrite_path(url.path());
            url.set_path(&rewritten);
        }

        let mut merged: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .filter(|(k, _)| !query.iter().any(|(nk, _)| nk == k))
            .collect();
        merged.extend(query.iter().cloned());

        url.set_query(None);
        if !merged.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &merged {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: &RequestBody,
        attachments: &[Attachment],
    ) -> Result<RequestBuilder> {
        if !attachments.is_empty() {
            // multipart supplies its own boundary-bearing Content-Type;
            // leaving the prepared one in place would send two
            headers.remove(CONTENT_TYPE);
        }
        let mut request = self.client.request(method, url).headers(headers);
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(v) => request.body(serde_json::to_vec(v)?),
            RequestBody::Raw(bytes) => request.body(bytes.clone()),
        };
        if !attachments.is_empty() {
            let mut form = reqwest::blocking::multipart::Form::new();
            for attachment in attachments {
                form = form
                    .file(attachment.field.clone(), &attachment.path)
                    .map_err(QsenseError::Io)?;
            }
            request = request.multipart(form);
        }
        Ok(request)
    }

    /// Issue one request, re-signing NTLM for the target when enabled and
    /// answering a Type 2 challenge on the spot.
    fn send(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: &RequestBody,
        attachments: &[Attachment],
    ) -> Result<Response> {
        if let Some(ntlm) = &self.ntlm {
            ntlm.apply(&mut headers)
                .map_err(|e| QsenseError::Auth(e.to_string()))?;
        }
        let response = self
            .build_request(method.clone(), url, headers.clone(), body, attachments)?
            .send()?;
        self.answer_ntlm_challenge(response, &method, &headers, body, attachments)
    }

    /// Complete the NTLM handshake: a 401 carrying a Type 2 challenge is
    /// answered once with a Type 3 message on the same URL. Any other 401
    /// is returned to the caller untouched.
    fn answer_ntlm_challenge(
        &self,
        response: Response,
        method: &Method,
        headers: &HeaderMap,
        body: &RequestBody,
        attachments: &[Attachment],
    ) -> Result<Response> {
        let Some(ntlm) = &self.ntlm else {
            return Ok(response);
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Ok(challenge) = challenge_from_headers(response.headers()) else {
            return Ok(response);
        };
        debug!("answering NTLM challenge");

        let mut retry_headers = headers.clone();
        retry_headers.insert(
            AUTHORIZATION,
            ntlm.authenticate_header(&challenge)
                .map_err(|e| QsenseError::Auth(e.to_string()))?,
        );
        let url = response.url().clone();
        Ok(self
            .build_request(method.clone(), url, retry_headers, body, attachments)?
            .send()?)
    }
}

fn parse_method(method: &str) -> Result<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        other => Err(QsenseError::Argument(format!("invalid method <{other}>"))),
    }
}
