use serde::{Deserialize, Serialize};

use crate::controls::Control;

/// Authentication strength behind a bound identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    #[default]
    None,
    Simple,
    Strong,
}

/// The principal a context acts as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "dn")]
pub enum Identity {
    Anonymous,
    Principal(String),
}

impl Identity {
    /// Principals with a blank name count as anonymous, same as an explicit
    /// anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        match self {
            Self::Anonymous => true,
            Self::Principal(dn) => dn.trim().is_empty(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Anonymous => "",
            Self::Principal(dn) => dn,
        }
    }
}

/// Bound identity plus the connection controls active when it was created.
///
/// Shared as `Arc<SecurityContext>` between the session table and every
/// operation dispatched while it was current.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub identity: Identity,
    pub auth_level: AuthLevel,
    pub controls: Vec<Control>,
    pub provider_url: String,
}

impl SecurityContext {
    pub fn anonymous(controls: &[Control], provider_url: impl Into<String>) -> Self {
        Self {
            identity: Identity::Anonymous,
            auth_level: AuthLevel::None,
            controls: controls.to_vec(),
            provider_url: provider_url.into(),
        }
    }

    pub fn principal(
        dn: impl Into<String>,
        auth_level: AuthLevel,
        controls: &[Control],
        provider_url: impl Into<String>,
    ) -> Self {
        Self {
            identity: Identity::Principal(dn.into()),
            auth_level,
            controls: controls.to_vec(),
            provider_url: provider_url.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity.is_anonymous()
    }
}
