use std::collections::HashSet;

use thiserror::Error;

use crate::ForwardConfig;

/// Why an `AuthRequest` was rejected before any policy/auth lookup happened.
/// Carried back verbatim as `AuthResponse.error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("token must not be empty")]
    EmptyToken,
    #[error("at least one forward is required")]
    NoForwards,
    #[error("invalid subdomain '{0}'")]
    InvalidSubdomain(String),
    #[error("invalid local port {0}")]
    InvalidPort(u16),
    #[error("duplicate subdomain '{0}'")]
    DuplicateSubdomain(String),
    #[error("more than one forward is marked primary")]
    MultiplePrimary,
}

/// A lowercase DNS label: 1-63 chars, `[a-z0-9-]`, not starting/ending with `-`.
pub fn is_valid_subdomain(label: &str) -> bool {
    if label.is_empty() || label.len() > 63 {
        return false;
    }
    if !label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return false;
    }
    !label.starts_with('-') && !label.ends_with('-')
}

/// Validates the shape of an `AuthRequest` per spec.md P5, independent of
/// token resolution or policy admission (those happen afterward, against
/// the auth collaborator and the live registry).
pub fn validate_auth_request(
    token: &str,
    forwards: &[ForwardConfig],
) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::EmptyToken);
    }
    if forwards.is_empty() {
        return Err(ValidationError::NoForwards);
    }

    let mut seen = HashSet::with_capacity(forwards.len());
    let mut primary_count = 0;
    for fwd in forwards {
        if !is_valid_subdomain(&fwd.subdomain) {
            return Err(ValidationError::InvalidSubdomain(fwd.subdomain.clone()));
        }
        if fwd.local_port == 0 {
            return Err(ValidationError::InvalidPort(fwd.local_port));
        }
        // `is_valid_subdomain` above already rejects any uppercase byte, so
        // everything reaching this point is already a canonical lowercase label.
        if !seen.insert(fwd.subdomain.clone()) {
            return Err(ValidationError::DuplicateSubdomain(fwd.subdomain.clone()));
        }
        if fwd.primary {
            primary_count += 1;
        }
    }
    if primary_count > 1 {
        return Err(ValidationError::MultiplePrimary);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fwd(subdomain: &str, port: u16, primary: bool) -> ForwardConfig {
        ForwardConfig {
            subdomain: subdomain.into(),
            local_port: port,
            local_https: false,
            primary,
        }
    }

    #[test]
    fn accepts_a_minimal_valid_request() {
        assert!(validate_auth_request("tok", &[fwd("app", 3000, true)]).is_ok());
    }

    #[test]
    fn rejects_empty_token() {
        assert_eq!(
            validate_auth_request("", &[fwd("app", 3000, false)]),
            Err(ValidationError::EmptyToken)
        );
    }

    #[test]
    fn rejects_no_forwards() {
        assert_eq!(
            validate_auth_request("tok", &[]),
            Err(ValidationError::NoForwards)
        );
    }

    #[test]
    fn rejects_bad_subdomain_shapes() {
        for bad in ["-leading", "trailing-", "Upper", "has_underscore", ""] {
            let res = validate_auth_request("tok", &[fwd(bad, 80, false)]);
            assert!(res.is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn rejects_port_zero() {
        assert_eq!(
            validate_auth_request("tok", &[fwd("app", 0, false)]),
            Err(ValidationError::InvalidPort(0))
        );
    }

    #[test]
    fn rejects_duplicate_subdomains() {
        let res = validate_auth_request("tok", &[fwd("app", 80, false), fwd("app", 81, false)]);
        assert_eq!(res, Err(ValidationError::DuplicateSubdomain("app".into())));
    }

    #[test]
    fn rejects_more_than_one_primary() {
        let res = validate_auth_request(
            "tok",
            &[fwd("a", 80, true), fwd("b", 81, true)],
        );
        assert_eq!(res, Err(ValidationError::MultiplePrimary));
    }

    #[test]
    fn accepts_multiple_forwards_with_one_primary() {
        let res = validate_auth_request(
            "tok",
            &[fwd("a", 80, true), fwd("b", 81, false), fwd("c", 82, false)],
        );
        assert!(res.is_ok());
    }

    #[test]
    fn accepts_63_char_label_rejects_64() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(is_valid_subdomain(&ok));
        assert!(!is_valid_subdomain(&too_long));
    }
}
