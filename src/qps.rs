//! Proxy Service (QPS) client
//!
//! Session and ticket management. Thin URL templating over
//! [`RequestDriver`]; every call goes through the shared pipeline.

use crate::config::Config;
use crate::driver::{Outcome, Params, RequestDriver};
use crate::errors::Result;

/// Default QPS port on a Sense node.
pub const DEFAULT_PORT: u16 = 4243;

/// Qlik Sense Proxy Service REST API.
pub struct Qps {
    driver: RequestDriver,
}

impl Qps {
    pub fn connect(config: Config) -> Result<Self> {
        Ok(Self {
            driver: RequestDriver::new(config)?,
        })
    }

    /// All proxy sessions belonging to a user.
    pub fn user_sessions(&self, directory: &str, user: &str) -> Result<Outcome> {
        self.driver
            .get(&format!("/qps/user/{directory}/{user}"), &Params::new())
    }

    /// Log a user out, closing every proxy session they hold. Returns the
    /// list of sessions that were closed.
    pub fn logout_user(&self, directory: &str, user: &str) -> Result<Outcome> {
        self.driver
            .delete(&format!("/qps/user/{directory}/{user}"), &Params::new())
    }

    /// The proxy session identified by `id`.
    pub fn session(&self, id: &str) -> Result<Outcome> {
        self.driver
            .get(&format!("/qps/session/{id}"), &Params::new())
    }

    /// Delete the proxy session identified by `id`.
    pub fn delete_session(&self, id: &str) -> Result<Outcome> {
        self.driver
            .delete(&format!("/qps/session/{id}"), &Params::new())
    }

    pub fn driver(&self) -> &RequestDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut RequestDriver {
        &mut self.driver
    }
}
