//! Secret redaction for keys that pass through config, logs and errors.
//!
//! [`Redacted`] hides the deployer's private key and the explorer API key:
//! `Debug`, `Display` and `Serialize` all render `"<redacted>"`. Code that
//! actually needs the secret calls [`Redacted::expose`].

use std::fmt::{self, Debug, Display};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// The wrapped secret
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Redacted(value)
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> serde::Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        "<redacted>".serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_never_formatted() {
        let key = Redacted(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
        );
        assert_eq!(format!("{key}"), "<redacted>");
        assert_eq!(format!("{key:?}"), "<redacted>");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"<redacted>\"");
        assert!(key.expose().starts_with("0xac09"));
    }

    #[test]
    fn test_redacted_inside_debug_struct() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Secrets {
            api_key: Redacted<String>,
        }
        let s = Secrets {
            api_key: "ABC123".to_string().into(),
        };
        assert!(!format!("{s:?}").contains("ABC123"));
    }
}
