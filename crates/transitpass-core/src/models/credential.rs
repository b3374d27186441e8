use std::fmt;

use serde::Deserialize;

/// Bearer credential issued by the token and registration endpoints.
///
/// Serialized as the header-ready string `"<scheme> <token>"`. The scheme is
/// kept exactly as the server returned it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub scheme: String,
    pub token: String,
}

impl Credential {
    pub fn new(scheme: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            token: token.into(),
        }
    }

    /// The value sent in the Authorization header.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }

    /// Parse a stored header value. Returns `None` unless both a scheme and a
    /// token are present, so a reloaded credential always reproduces the
    /// original header.
    pub fn from_header_value(value: &str) -> Option<Self> {
        let (scheme, token) = value.split_once(' ')?;
        if scheme.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self::new(scheme, token))
    }
}

// Never print the token
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Response body of `/token` and `/register`.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl From<TokenResponse> for Credential {
    fn from(resp: TokenResponse) -> Self {
        Credential::new(resp.token_type, resp.access_token)
    }
}

/// Authentication lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    LoggedIn,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::LoggedOut => "logged out",
            SessionState::Authenticating => "authenticating",
            SessionState::LoggedIn => "logged in",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_round_trip() {
        let cred = Credential::new("bearer", "eyJhbGciOi.abc.def");
        let header = cred.header_value();
        assert_eq!(header, "bearer eyJhbGciOi.abc.def");
        assert_eq!(Credential::from_header_value(&header), Some(cred));
    }

    #[test]
    fn test_scheme_casing_preserved() {
        let cred = Credential::from_header_value("BeArEr tok").unwrap();
        assert_eq!(cred.scheme, "BeArEr");
        assert_eq!(cred.header_value(), "BeArEr tok");
    }

    #[test]
    fn test_from_header_value_rejects_partial() {
        assert_eq!(Credential::from_header_value(""), None);
        assert_eq!(Credential::from_header_value("tokenonly"), None);
        assert_eq!(Credential::from_header_value(" tok"), None);
        assert_eq!(Credential::from_header_value("bearer "), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = Credential::new("bearer", "super-secret");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("bearer"));
    }

    #[test]
    fn test_token_response_requires_token_type() {
        let missing: Result<TokenResponse, _> =
            serde_json::from_str(r#"{"access_token": "abc"}"#);
        assert!(missing.is_err());

        let ok: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc", "token_type": "bearer"}"#).unwrap();
        let cred = Credential::from(ok);
        assert_eq!(cred.header_value(), "bearer abc");
    }
}
