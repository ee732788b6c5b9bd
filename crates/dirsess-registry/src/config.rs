use std::sync::Arc;

use dirsess_core::{ContextFactory, Control, Credentials, SecurityContext};

use crate::error::RegistryError;

/// How anonymous contexts get built.
#[derive(Clone, Default)]
pub enum ContextSource {
    /// Build an unauthenticated context directly from the connection controls.
    #[default]
    DefaultAnonymous,
    /// Hand anonymous construction to an installed factory.
    CustomFactory(Arc<dyn ContextFactory>),
}

impl std::fmt::Debug for ContextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefaultAnonymous => f.write_str("DefaultAnonymous"),
            Self::CustomFactory(_) => f.write_str("CustomFactory(..)"),
        }
    }
}

/// Immutable registry configuration, built once and shared by reference.
#[derive(Clone, Debug, Default)]
pub struct RegistryConfig {
    /// Naming context new contexts are rooted at; empty means the server root.
    pub provider_url: String,
    pub context_source: ContextSource,
}

impl RegistryConfig {
    pub fn with_factory(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            context_source: ContextSource::CustomFactory(factory),
            ..Default::default()
        }
    }

    /// Construct a fresh anonymous context. Nothing is stored.
    pub fn anonymous_context(&self, controls: &[Control]) -> Result<SecurityContext, RegistryError> {
        match &self.context_source {
            ContextSource::DefaultAnonymous => {
                Ok(SecurityContext::anonymous(controls, self.provider_url.clone()))
            }
            ContextSource::CustomFactory(factory) => {
                Ok(factory.create(controls, &Credentials::Anonymous)?)
            }
        }
    }
}
