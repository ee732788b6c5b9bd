use secrecy::ExposeSecret;

use crate::context::{AuthLevel, SecurityContext};
use crate::controls::Control;
use crate::credentials::Credentials;
use crate::errors::ContextError;

/// Builds a security context for a connection.
///
/// The authentication mechanism lives behind this trait; callers only see the
/// resulting identity.
pub trait ContextFactory: Send + Sync {
    fn create(
        &self,
        controls: &[Control],
        credentials: &Credentials,
    ) -> Result<SecurityContext, ContextError>;
}

/// Factory used when no custom one is configured.
///
/// Accepts anonymous access and any simple bind carrying a password; the
/// password check itself belongs to the directory backend.
#[derive(Clone, Debug, Default)]
pub struct DirectoryContextFactory {
    provider_url: String,
}

impl DirectoryContextFactory {
    pub fn new(provider_url: impl Into<String>) -> Self {
        Self {
            provider_url: provider_url.into(),
        }
    }
}

impl ContextFactory for DirectoryContextFactory {
    fn create(
        &self,
        controls: &[Control],
        credentials: &Credentials,
    ) -> Result<SecurityContext, ContextError> {
        match credentials {
            Credentials::Anonymous => {
                Ok(SecurityContext::anonymous(controls, self.provider_url.clone()))
            }
            Credentials::Simple { dn, .. } if dn.trim().is_empty() => {
                Ok(SecurityContext::anonymous(controls, self.provider_url.clone()))
            }
            Credentials::Simple { dn, password } => {
                if password.expose_secret().is_empty() {
                    return Err(ContextError::InvalidCredentials(format!(
                        "unauthenticated bind for {dn}"
                    )));
                }
                Ok(SecurityContext::principal(
                    dn.trim(),
                    AuthLevel::Simple,
                    controls,
                    self.provider_url.clone(),
                ))
            }
        }
    }
}
