// Boundary error taxonomy. Every user-visible error carries one of these
// kinds; the API layer maps them onto HTTP status codes.

use serde::{Deserialize, Serialize};

/// Error kinds surfaced at the system boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Timeout,
    Internal,
    Unavailable,
}

impl ErrorKind {
    /// Short kind label used in responses and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate-limited",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_kebab_case() {
        assert_eq!(ErrorKind::RateLimited.label(), "rate-limited");
        assert_eq!(ErrorKind::NotFound.to_string(), "not-found");
    }
}
