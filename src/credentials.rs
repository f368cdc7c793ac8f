//! Portal credential resolution.
//!
//! Credentials are never stored by this crate. Config files hold a
//! [`CredentialRef`] pointing at the secret: inline plaintext, an
//! environment variable, or an entry in the OS keyring (via `keyring`).

use crate::error::{PontoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keyring service name for portal secrets.
pub const KEYRING_SERVICE: &str = "ponto";

/// Where to find a secret value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialRef {
    /// Not configured.
    #[default]
    None,
    /// Value stored inline in the config file.
    Plaintext(String),
    /// Value read from an environment variable.
    Env {
        env: String,
    },
    /// Value read from the OS keyring under [`KEYRING_SERVICE`].
    Keyring {
        keyring: String,
    },
}

impl CredentialRef {
    /// `true` for [`CredentialRef::None`]; used to skip serialization.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// `true` when the reference points somewhere.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self {
            Self::None => false,
            Self::Plaintext(value) => !value.is_empty(),
            Self::Env { .. } | Self::Keyring { .. } => true,
        }
    }

    /// Resolve the reference to its secret value.
    ///
    /// # Errors
    ///
    /// Returns [`PontoError::Credentials`] when the reference is unset or
    /// its target is missing.
    pub fn resolve(&self, what: &str) -> Result<String> {
        match self {
            Self::None => Err(PontoError::Credentials(format!("{what} is not configured"))),
            Self::Plaintext(value) if value.is_empty() => {
                Err(PontoError::Credentials(format!("{what} is empty")))
            }
            Self::Plaintext(value) => Ok(value.clone()),
            Self::Env { env } => std::env::var(env).map_err(|_| {
                PontoError::Credentials(format!("{what}: environment variable {env} is not set"))
            }),
            Self::Keyring { keyring } => {
                let entry = keyring::Entry::new(KEYRING_SERVICE, keyring).map_err(|e| {
                    PontoError::Credentials(format!("{what}: cannot open keyring entry: {e}"))
                })?;
                match entry.get_password() {
                    Ok(value) => Ok(value),
                    Err(keyring::Error::NoEntry) => Err(PontoError::Credentials(format!(
                        "{what}: no keyring entry for account {keyring:?}"
                    ))),
                    Err(e) => Err(PontoError::Credentials(format!(
                        "{what}: keyring lookup failed: {e}"
                    ))),
                }
            }
        }
    }
}

/// Portal login: employee registration number ("folha") and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub folha: String,
    pub senha: String,
}

impl Credentials {
    pub fn new(folha: impl Into<String>, senha: impl Into<String>) -> Self {
        Self {
            folha: folha.into(),
            senha: senha.into(),
        }
    }

    /// Resolve both references.
    ///
    /// # Errors
    ///
    /// Returns [`PontoError::Credentials`] if either value cannot be found.
    pub fn resolve(folha: &CredentialRef, senha: &CredentialRef) -> Result<Self> {
        Ok(Self {
            folha: folha.resolve("folha")?,
            senha: senha.resolve("senha")?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("folha", &self.folha)
            .field("senha", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("12345", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("12345"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn plaintext_resolves() {
        let r = CredentialRef::Plaintext("abc".to_owned());
        assert!(r.is_set());
        assert_eq!(r.resolve("senha").unwrap(), "abc");
    }

    #[test]
    fn unset_and_empty_fail() {
        assert!(!CredentialRef::None.is_set());
        assert!(CredentialRef::None.resolve("folha").is_err());
        assert!(CredentialRef::Plaintext(String::new()).resolve("folha").is_err());
    }

    #[test]
    fn missing_env_var_fails() {
        let r = CredentialRef::Env {
            env: "PONTO_TEST_SURELY_UNSET_VAR_91823".to_owned(),
        };
        let err = r.resolve("senha").unwrap_err();
        assert!(err.to_string().contains("PONTO_TEST_SURELY_UNSET_VAR_91823"));
    }

    #[test]
    fn env_var_resolves_when_present() {
        // PATH is set in every test environment.
        let r = CredentialRef::Env {
            env: "PATH".to_owned(),
        };
        assert!(!r.resolve("folha").unwrap().is_empty());
    }

    #[test]
    fn toml_forms_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            a: CredentialRef,
            b: CredentialRef,
            c: CredentialRef,
        }
        let w: Wrapper = toml::from_str(
            r#"
a = "plain"
b = { env = "PONTO_SENHA" }
c = { keyring = "12345" }
"#,
        )
        .unwrap();
        assert_eq!(w.a, CredentialRef::Plaintext("plain".to_owned()));
        assert_eq!(
            w.b,
            CredentialRef::Env {
                env: "PONTO_SENHA".to_owned()
            }
        );
        assert_eq!(
            w.c,
            CredentialRef::Keyring {
                keyring: "12345".to_owned()
            }
        );
    }
}
