use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SharingPolicy
// ---------------------------------------------------------------------------

/// Who may see an artifact once it is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingPolicy {
    /// Discoverable by every command; consumers are notified right away.
    #[default]
    Immediate,
    /// Discoverable by every command, but nobody is notified.
    OnRequest,
    /// Only returned to direct lookups; never satisfies another command's dependency.
    Private,
}

impl SharingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SharingPolicy::Immediate => "immediate",
            SharingPolicy::OnRequest => "on_request",
            SharingPolicy::Private => "private",
        }
    }

    pub fn is_shared(self) -> bool {
        !matches!(self, SharingPolicy::Private)
    }

    pub fn pushes_notifications(self) -> bool {
        matches!(self, SharingPolicy::Immediate)
    }
}

impl fmt::Display for SharingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SharingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(SharingPolicy::Immediate),
            "on_request" | "on-request" => Ok(SharingPolicy::OnRequest),
            "private" => Ok(SharingPolicy::Private),
            other => Err(format!("unknown sharing policy '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfidenceLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

pub const DEFAULT_FORMAT: &str = "markdown";

/// File extension used for content written in `format`.
pub fn extension_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "markdown" | "md" => "md",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "csv" => "csv",
        "html" => "html",
        _ => "txt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharing_policy_parse() {
        assert_eq!("immediate".parse::<SharingPolicy>(), Ok(SharingPolicy::Immediate));
        assert_eq!("on-request".parse::<SharingPolicy>(), Ok(SharingPolicy::OnRequest));
        assert!("broadcast".parse::<SharingPolicy>().is_err());
        assert!(!SharingPolicy::Private.is_shared());
        assert!(!SharingPolicy::OnRequest.pushes_notifications());
    }

    #[test]
    fn sharing_policy_yaml_uses_snake_case() {
        let s = serde_yaml::to_string(&SharingPolicy::OnRequest).unwrap();
        assert_eq!(s.trim(), "on_request");
    }

    #[test]
    fn format_extensions() {
        assert_eq!(extension_for_format("markdown"), "md");
        assert_eq!(extension_for_format("YAML"), "yaml");
        assert_eq!(extension_for_format("pdf-ish"), "txt");
    }
}
