use std::{borrow::Cow, env::VarError, fmt, ops::Deref};

use serde::Deserialize;
use zeroize::Zeroize;

/// A credential for a backend service. Generally any semi-secret item.
///
/// This wrapper just prevents the value from appearing in debug reprs.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        let value = std::env::var(var)?;
        Ok(Secret(value.into()))
    }

    /// Expose the underlying value of this credential
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"****").finish()
    }
}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let secret = Secret::from("secret garden");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("secret garden"));
        assert_eq!(secret.revealed(), "secret garden");
    }

    #[test]
    fn secret_deserializes_from_string() {
        let secret: Secret = serde_json::from_str("\"hunter2\"").unwrap();
        assert_eq!(secret.revealed(), "hunter2");
    }
}
