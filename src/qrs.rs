//! Repository Service (QRS) client
//!
//! Entity operations over [`RequestDriver`]. Connecting queries the server
//! build once, rejects servers older than the supported API baseline, and
//! fixes the app-export endpoint variant for the lifetime of the client.

use std::path::{Path, PathBuf};

use semver::Version;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::driver::{Outcome, Params, RequestBody, RequestDriver};
use crate::errors::{QsenseError, Result};

/// Default QRS port on a Sense node.
pub const DEFAULT_PORT: u16 = 4242;

/// Oldest supported server API (Qlik Sense 3.0, June 2016).
pub const MIN_SERVER_VERSION: Version = Version::new(3, 0, 0);

/// Builds older than this only offer the deprecated ticket-based export API.
const LEGACY_EXPORT_THRESHOLD: Version = Version::new(17, 0, 0);

/// App-export endpoint variant, selected once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportApi {
    /// POST `/qrs/app/{id}/export/{token}`, download from `downloadPath`
    Modern,
    /// GET `/qrs/app/{id}/export`, download via the returned ticket
    Legacy,
}

/// Qlik Sense Repository Service REST API.
pub struct Qrs {
    driver: RequestDriver,
    server_version: Version,
    export_api: ExportApi,
}

impl Qrs {
    /// Connect and verify the server is at least [`MIN_SERVER_VERSION`].
    pub fn connect(config: Config) -> Result<Self> {
        let driver = RequestDriver::new(config)?;

        let about: JsonValue = driver.get("/qrs/about", &Params::new())?.json()?;
        let raw = about
            .get("buildVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let server_version = parse_build_version(raw)?;

        if MIN_SERVER_VERSION > server_version {
            return Err(QsenseError::Version {
                required: MIN_SERVER_VERSION,
                server: server_version,
            });
        }
        info!(version = %server_version, "server version");

        let export_api = if server_version < LEGACY_EXPORT_THRESHOLD {
            ExportApi::Legacy
        } else {
            ExportApi::Modern
        };

        Ok(Self {
            driver,
            server_version,
            export_api,
        })
    }

    pub fn server_version(&self) -> &Version {
        &self.server_version
    }

    pub fn export_api(&self) -> ExportApi {
        self.export_api
    }

    /// True when the repository service answers its ping endpoint.
    pub fn ping(&self) -> Result<bool> {
        Ok(self.driver.get("/qrs/ssl/ping", &Params::new())?.ok())
    }

    /// Repository information: version, database provider, central-node flag.
    pub fn about(&self) -> Result<JsonValue> {
        self.driver.get("/qrs/about", &Params::new())?.json()
    }

    /// Count entities of `entity_type`, optionally filtered.
    pub fn count(&self, entity_type: &str, filter: Option<&str>) -> Result<u64> {
        let params = Params::new().set_opt("filter", filter);
        let value: JsonValue = self
            .driver
            .get(&format!("/qrs/{entity_type}/count"), &params)?
            .json()?;
        Ok(value.get("value").and_then(JsonValue::as_u64).unwrap_or(0))
    }

    /// App metadata for `id` (or `full` for all apps), optionally filtered.
    pub fn app_get(&self, id: &str, filter: Option<&str>) -> Result<JsonValue> {
        let params = Params::new().set_opt("filter", filter);
        self.driver.get(&format!("/qrs/app/{id}"), &params)?.json()
    }

    /// Export the app `id` as a .qvf file.
    ///
    /// The endpoint variant was fixed at connect time; both variants first
    /// request an export handle and then stream the archive to `filename`
    /// (defaulting to `<id>.qvf`).
    pub fn app_export(
        &self,
        id: &str,
        filename: Option<&Path>,
        skip_data: bool,
    ) -> Result<Outcome> {
        let target = filename
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(format!("{id}.qvf")));

        match self.export_api {
            ExportApi::Legacy => {
                info!(version = %self.server_version, "using legacy export API");
                let handle = self
                    .driver
                    .get(&format!("/qrs/app/{id}/export"), &Params::new())?;
                if !handle.ok() {
                    return Ok(handle);
                }
                let ticket = handle
                    .json::<JsonValue>()?
                    .get("value")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        QsenseError::Parse("export response missing ticket value".to_string())
                    })?
                    .to_string();
                let file_name = target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{id}.qvf"));
                self.driver.download(
                    &format!("/qrs/download/app/{id}/{ticket}/{file_name}"),
                    &target,
                    &Params::new(),
                )
            }
            ExportApi::Modern => {
                let token = Uuid::new_v4();
                let params = Params::new().set("skipData", skip_data);
                let handle = self.driver.post(
                    &format!("/qrs/app/{id}/export/{token}"),
                    &params,
                    RequestBody::Empty,
                )?;
                if !handle.ok() {
                    return Ok(handle);
                }
                let download_path = handle
                    .json::<JsonValue>()?
                    .get("downloadPath")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        QsenseError::Parse("export response missing downloadPath".to_string())
                    })?
                    .to_string();
                self.driver.download(&download_path, &target, &Params::new())
            }
        }
    }

    /// Upload a .qvf file to the central node as app `name`.
    pub fn app_upload(
        &self,
        filename: impl AsRef<Path>,
        name: &str,
        keep_data: Option<bool>,
    ) -> Result<Outcome> {
        let params = Params::new().set("name", name).set_opt("keepdata", keep_data);
        self.driver.upload("/qrs/app/upload", filename, &params)
    }

    pub fn driver(&self) -> &RequestDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut RequestDriver {
        &mut self.driver
    }
}

/// Parse a server `buildVersion` string, which comes as a dotted numeric of
/// varying arity (e.g. `"12.429.1"` or `"34.16.0.0"`).
fn parse_build_version(raw: &str) -> Result<Version> {
    let mut nums = [0u64; 3];
    let mut parts = raw.split('.');
    for slot in &mut nums {
        match parts.next() {
            Some(part) => {
                *slot = part.parse().map_err(|_| {
                    QsenseError::Parse(format!("unparseable server buildVersion '{raw}'"))
                })?;
            }
            None => break,
        }
    }
    Ok(Version::new(nums[0], nums[1], nums[2]))
}
