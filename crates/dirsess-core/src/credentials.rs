use secrecy::SecretString;

/// What a bind presented, or the absence of any bind.
#[derive(Clone)]
pub enum Credentials {
    Anonymous,
    Simple { dn: String, password: SecretString },
}

impl Credentials {
    pub fn simple(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Simple {
            dn: dn.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// A simple bind with an empty name is an anonymous bind.
    pub fn is_anonymous(&self) -> bool {
        match self {
            Self::Anonymous => true,
            Self::Simple { dn, .. } => dn.trim().is_empty(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Simple { dn, .. } => f
                .debug_struct("Simple")
                .field("dn", dn)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::simple("uid=admin,ou=system", "secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret"), "password leaked: {debug}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn empty_dn_is_anonymous() {
        assert!(Credentials::Anonymous.is_anonymous());
        assert!(Credentials::simple("  ", "").is_anonymous());
        assert!(!Credentials::simple("uid=admin,ou=system", "x").is_anonymous());
    }

    #[test]
    fn password_is_exposable() {
        if let Credentials::Simple { password, .. } = Credentials::simple("cn=a", "pw") {
            assert_eq!(password.expose_secret(), "pw");
        } else {
            panic!("expected simple credentials");
        }
    }
}
