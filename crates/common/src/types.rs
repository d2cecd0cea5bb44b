//! Validated input values.
//!
//! A [`Domain`] keys every piece of state the bootstrapper touches: the
//! certificate bundle directory, the `server_name` of the generated proxy
//! configuration and the issuer request. Validating it once at the edge keeps
//! the rest of the pipeline free of string checks, and keeps arbitrary input
//! out of the arguments handed to external commands.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a fully qualified host name (RFC 1035)
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label
const MAX_LABEL_LEN: usize = 63;

/// Errors raised while validating input values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Domain must not be empty")]
    EmptyDomain,

    #[error("Domain is {0} characters long (max {MAX_DOMAIN_LEN})")]
    DomainTooLong(usize),

    #[error("Domain label '{0}' must be 1-{MAX_LABEL_LEN} characters")]
    InvalidLabelLength(String),

    #[error("Domain label '{0}' must not start or end with a hyphen")]
    HyphenBoundary(String),

    #[error("Domain label '{0}' contains characters outside [a-z0-9-]")]
    InvalidCharacter(String),

    #[error("Domain '{0}' ends in an all-numeric label; IP addresses cannot be validated over HTTP-01")]
    NumericTopLevel(String),

    #[error("Contact email must not be empty")]
    EmptyEmail,
}

/// A syntactically valid DNS host name, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Parse and normalize a host name
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let domain = input.trim().to_ascii_lowercase();

        if domain.is_empty() {
            return Err(ValueError::EmptyDomain);
        }
        if domain.len() > MAX_DOMAIN_LEN {
            return Err(ValueError::DomainTooLong(domain.len()));
        }

        for label in domain.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(ValueError::InvalidLabelLength(label.to_string()));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(ValueError::HyphenBoundary(label.to_string()));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            {
                return Err(ValueError::InvalidCharacter(label.to_string()));
            }
        }

        // Rules out IPv4 literals and other names no public suffix can match
        if domain
            .rsplit('.')
            .next()
            .is_some_and(|tld| tld.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(ValueError::NumericTopLevel(domain));
        }

        Ok(Self(domain))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Domain {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Contact address handed to the certificate issuer as account metadata.
///
/// Only non-emptiness is checked; the ACME server is the authority on
/// whether the address is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContactEmail(String);

impl ContactEmail {
    /// Parse a contact address
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let email = input.trim();
        if email.is_empty() {
            return Err(ValueError::EmptyEmail);
        }
        Ok(Self(email.to_string()))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContactEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContactEmail {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
