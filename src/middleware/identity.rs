//! Identity extraction from HTTP requests.
//!
//! Turnstile does not authenticate anyone. An identity source only reports
//! who an upstream authentication step says the caller is, or that it could
//! not tell.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::AUTHORIZATION;
use http::Request;

use crate::ratelimit::Identity;

/// What an identity source learned about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The request carries a usable identity.
    Authenticated(Identity),
    /// Credentials were present but malformed.
    Failed,
    /// No credentials at all.
    Missing,
}

impl IdentityOutcome {
    /// The identity, if one was established.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IdentityOutcome::Authenticated(identity) => Some(identity),
            IdentityOutcome::Failed | IdentityOutcome::Missing => None,
        }
    }
}

/// Strategy for finding the throttled subject of a request.
pub trait IdentitySource: Send + Sync + 'static {
    fn identify<B>(&self, req: &Request<B>) -> IdentityOutcome;
}

/// Reads an [`Identity`] placed in the request extensions by an upstream
/// authentication layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentity;

impl IdentitySource for ExtensionIdentity {
    fn identify<B>(&self, req: &Request<B>) -> IdentityOutcome {
        match req.extensions().get::<Identity>() {
            Some(identity) => IdentityOutcome::Authenticated(identity.clone()),
            None => IdentityOutcome::Missing,
        }
    }
}

/// Takes the user name from an `Authorization: Basic` header.
///
/// The password is ignored; checking it is the job of whatever sits in
/// front of the throttle.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAuthIdentity;

impl BasicAuthIdentity {
    fn parse(value: &str) -> Option<Identity> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let credentials = String::from_utf8(decoded).ok()?;
        let (user, _password) = credentials.split_once(':')?;
        if user.is_empty() {
            return None;
        }
        Some(Identity::new(user))
    }
}

impl IdentitySource for BasicAuthIdentity {
    fn identify<B>(&self, req: &Request<B>) -> IdentityOutcome {
        let Some(value) = req.headers().get(AUTHORIZATION) else {
            return IdentityOutcome::Missing;
        };

        value
            .to_str()
            .ok()
            .and_then(Self::parse)
            .map(IdentityOutcome::Authenticated)
            .unwrap_or(IdentityOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_authorization(value: &str) -> Request<()> {
        Request::builder()
            .header(AUTHORIZATION, value)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_basic_auth_user() {
        let credentials = STANDARD.encode("joe:secret");
        let req = with_authorization(&format!("Basic {}", credentials));

        assert_eq!(
            BasicAuthIdentity.identify(&req),
            IdentityOutcome::Authenticated(Identity::from("joe"))
        );
    }

    #[test]
    fn test_basic_auth_scheme_is_case_insensitive() {
        let credentials = STANDARD.encode("jane:pw");
        let req = with_authorization(&format!("basic {}", credentials));

        assert_eq!(
            BasicAuthIdentity.identify(&req).identity(),
            Some(&Identity::from("jane"))
        );
    }

    #[test]
    fn test_basic_auth_missing_header() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(BasicAuthIdentity.identify(&req), IdentityOutcome::Missing);
    }

    #[test]
    fn test_basic_auth_malformed() {
        let cases = [
            "Basic !!!not-base64!!!".to_string(),
            format!("Basic {}", STANDARD.encode("no-colon")),
            format!("Basic {}", STANDARD.encode(":password-only")),
            format!("Bearer {}", STANDARD.encode("joe:secret")),
            "Basic".to_string(),
        ];

        for value in cases {
            let req = with_authorization(&value);
            assert_eq!(
                BasicAuthIdentity.identify(&req),
                IdentityOutcome::Failed,
                "header {:?} should fail",
                value
            );
        }
    }

    #[test]
    fn test_extension_identity() {
        let mut req = Request::builder().body(()).unwrap();
        assert_eq!(ExtensionIdentity.identify(&req), IdentityOutcome::Missing);

        req.extensions_mut().insert(Identity::from("joe"));
        assert_eq!(
            ExtensionIdentity.identify(&req),
            IdentityOutcome::Authenticated(Identity::from("joe"))
        );
    }
}
