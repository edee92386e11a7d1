//! Validation for logical names, bucket names and provider settings
//!
//! Logical names identify resources inside a plan and appear in references
//! (`${name.attribute}`), so they are restricted to a conservative character set.
//! Bucket names follow the S3 naming rules.

use crate::error::{PlanError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::sync::OnceLock;
use validator::ValidationError;

/// Character class shared with the reference syntax in [`crate::core::template`].
pub(crate) const NAME_CHARS: &str = r"[A-Za-z][A-Za-z0-9_-]*";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{NAME_CHARS}$")).expect("static pattern"))
}

fn bucket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$").expect("static pattern"))
}

fn region_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]*)?-[a-z]+-\d$").expect("static pattern"))
}

/// A stable logical resource name
///
/// # Rules
/// - Starts with an ASCII letter
/// - Letters, digits, `_` and `-` afterwards
/// - Length: 1-64 characters
///
/// # Examples
///
/// ```
/// use siteplan::LogicalName;
///
/// let name = LogicalName::new("build_role").unwrap();
/// assert_eq!(name.as_str(), "build_role");
///
/// assert!(LogicalName::new("1st").is_err());
/// assert!(LogicalName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalName(String);

impl LogicalName {
    /// Maximum length of a logical name
    pub const MAX_LENGTH: usize = 64;

    /// Create a new validated logical name
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name doesn't meet the rules above.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PlanError::InvalidName("name cannot be empty".to_string()));
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(PlanError::InvalidName(format!(
                "'{}' is too long (max {} characters)",
                name,
                Self::MAX_LENGTH
            )));
        }
        if !name_regex().is_match(&name) {
            return Err(PlanError::InvalidName(format!(
                "'{}' must start with a letter and contain only letters, digits, '_' and '-'",
                name
            )));
        }
        Ok(LogicalName(name))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for LogicalName {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self> {
        LogicalName::new(value)
    }
}

impl From<LogicalName> for String {
    fn from(value: LogicalName) -> Self {
        value.0
    }
}

impl AsRef<str> for LogicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LogicalName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LogicalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An S3 bucket name
///
/// # Rules
/// - 3-63 characters
/// - Lowercase letters, digits, `.` and `-`; starts and ends with a letter or digit
/// - No consecutive dots, not formatted as an IPv4 address
/// - No `xn--` prefix and no `-s3alias` suffix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    const MIN_LENGTH: usize = 3;
    const MAX_LENGTH: usize = 63;

    /// Create a new validated bucket name
    ///
    /// ```
    /// use siteplan::BucketName;
    ///
    /// assert!(BucketName::new("www.example.com").is_ok());
    /// assert!(BucketName::new("Example").is_err());
    /// assert!(BucketName::new("192.168.0.1").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_bucket_name(&name).map_err(PlanError::InvalidBucketName)?;
        Ok(BucketName(name))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_bucket_name(name: &str) -> std::result::Result<(), String> {
    if name.len() < BucketName::MIN_LENGTH || name.len() > BucketName::MAX_LENGTH {
        return Err(format!(
            "'{}' must be {}-{} characters",
            name,
            BucketName::MIN_LENGTH,
            BucketName::MAX_LENGTH
        ));
    }
    if !bucket_regex().is_match(name) {
        return Err(format!(
            "'{}' may only contain lowercase letters, digits, '.' and '-'",
            name
        ));
    }
    if name.contains("..") {
        return Err(format!("'{}' contains consecutive dots", name));
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(format!("'{}' is formatted as an IP address", name));
    }
    if name.starts_with("xn--") || name.ends_with("-s3alias") {
        return Err(format!("'{}' uses a reserved prefix or suffix", name));
    }
    Ok(())
}

impl TryFrom<String> for BucketName {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self> {
        BucketName::new(value)
    }
}

impl From<BucketName> for String {
    fn from(value: BucketName) -> Self {
        value.0
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// validator hooks for the config structs

pub(crate) fn validate_region(region: &str) -> std::result::Result<(), ValidationError> {
    if region_regex().is_match(region) {
        Ok(())
    } else {
        Err(ValidationError::new("region"))
    }
}

pub(crate) fn validate_account_id(account: &str) -> std::result::Result<(), ValidationError> {
    if account.len() == 12 && account.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("account_id"))
    }
}

pub(crate) fn validate_bucket_name(name: &str) -> std::result::Result<(), ValidationError> {
    check_bucket_name(name).map_err(|_| ValidationError::new("bucket_name"))
}

pub(crate) fn validate_logical_name(name: &str) -> std::result::Result<(), ValidationError> {
    LogicalName::new(name)
        .map(|_| ())
        .map_err(|_| ValidationError::new("logical_name"))
}
