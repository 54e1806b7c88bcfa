//! Impersonated user identity
//!
//! Every request carries an `X-Qlik-User` header naming the user the call is
//! made on behalf of. The identity only affects transport authentication when
//! NTLM is in use (no client certificate and a password is present).

/// The user a driver impersonates: directory, user id and optional password.
///
/// All three fields are replaced together via
/// [`RequestDriver::set_user`](crate::RequestDriver::set_user); there is no
/// partial mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub directory: String,
    pub user_id: String,
    pub password: Option<String>,
}

impl Identity {
    pub fn new(directory: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            user_id: user_id.into(),
            password: None,
        }
    }

    pub fn with_password(
        directory: impl Into<String>,
        user_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            user_id: user_id.into(),
            password: Some(password.into()),
        }
    }

    /// Render the `X-Qlik-User` impersonation header value.
    pub fn header_value(&self) -> String {
        format!(
            "UserDirectory={}; UserId={}",
            self.directory, self.user_id
        )
    }

    /// Render the `DOMAIN\user` form NTLM expects.
    pub fn ntlm_username(&self) -> String {
        format!("{}\\{}", self.directory, self.user_id)
    }
}

impl Default for Identity {
    /// The repository service account used by server-side tooling.
    fn default() -> Self {
        Self::new("internal", "sa_repository")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value() {
        let id = Identity::new("CORP", "jdoe");
        assert_eq!(id.header_value(), "UserDirectory=CORP; UserId=jdoe");
    }

    #[test]
    fn test_ntlm_username() {
        let id = Identity::with_password("CORP", "jdoe", "hunter2");
        assert_eq!(id.ntlm_username(), "CORP\\jdoe");
    }

    #[test]
    fn test_default_is_repository_account() {
        let id = Identity::default();
        assert_eq!(id.directory, "internal");
        assert_eq!(id.user_id, "sa_repository");
        assert!(id.password.is_none());
    }
}
