//! Pattern matching and scope checks for resource addresses
//!
//! Supports IAM wildcards:
//! - `*` - Matches any run of characters, including `/` and `:`
//! - `?` - Matches exactly one character
//!
//! [`ResourcePattern::classify`] decides whether a pattern in a permission
//! statement is acceptable: exact addresses and references always are, prefix
//! wildcards only when the prefix names something inside a known namespace.

use crate::core::template::Template;
use crate::error::{PlanError, Result};

/// Pattern matcher for resource addresses
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a resource address matches a pattern
    ///
    /// # Examples
    /// ```
    /// use siteplan::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::site/index.html"));
    /// assert!(PatternMatcher::matches("arn:aws:s3:::codepipeline-us-east-1-*", "arn:aws:s3:::codepipeline-us-east-1-abc"));
    /// assert!(!PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::other/index.html"));
    /// ```
    pub fn matches(pattern: &str, resource: &str) -> bool {
        // Exact match
        if pattern == resource {
            return true;
        }

        // Check for wildcards
        if !pattern.contains('*') && !pattern.contains('?') {
            return false;
        }

        let pattern: Vec<char> = pattern.chars().collect();
        let resource: Vec<char> = resource.chars().collect();
        Self::match_glob(&pattern, &resource)
    }

    /// Iterative glob match with single-star backtracking
    fn match_glob(pattern: &[char], text: &[char]) -> bool {
        let (mut p, mut t) = (0, 0);
        // Position of the last `*` seen and the text index it was tried at
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
                p += 1;
                t += 1;
            } else if p < pattern.len() && pattern[p] == '*' {
                star = Some((p, t));
                p += 1;
            } else if let Some((star_p, star_t)) = star {
                // Let the last star absorb one more character
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            } else {
                return false;
            }
        }

        // Remaining pattern must be all stars
        pattern[p..].iter().all(|&c| c == '*')
    }
}

/// Scope of a resource pattern inside a permission statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePattern {
    /// The bare `*`
    Any,
    /// A concrete address, possibly built from references
    Exact,
    /// A wildcard anchored to a concrete resource or a named prefix
    Prefix,
}

impl ResourcePattern {
    /// Classify a resource template, rejecting unscoped wildcards
    ///
    /// `arn:aws:s3:::*` and `arn:aws:logs:us-east-1:1:log-group:*` are unscoped:
    /// the literal text before the first wildcard names only a service or a resource
    /// type, not a resource.
    pub fn classify(template: &Template) -> Result<Self> {
        let text = template.to_string();
        if text == "*" {
            return Ok(ResourcePattern::Any);
        }
        if !text.contains('*') && !text.contains('?') {
            return Ok(ResourcePattern::Exact);
        }
        // References resolve to concrete resources, so anything appended to one is
        // scoped to that resource.
        if template.starts_with_reference() {
            return Ok(ResourcePattern::Prefix);
        }

        let literal = template.leading_text();
        let before_wildcard = match literal.find(['*', '?']) {
            Some(idx) => &literal[..idx],
            None if !template.is_literal() => return Ok(ResourcePattern::Prefix),
            None => literal,
        };

        if names_a_resource(before_wildcard) {
            Ok(ResourcePattern::Prefix)
        } else {
            Err(PlanError::UnscopedWildcard(text))
        }
    }
}

/// Does an ARN prefix reach past the service, region, account and resource type?
fn names_a_resource(prefix: &str) -> bool {
    let mut fields = prefix.splitn(6, ':');
    let header: Vec<&str> = fields.by_ref().take(5).collect();
    if header.len() < 5 || header[0] != "arn" || header[1].is_empty() || header[2].is_empty() {
        return false;
    }
    let resource = match fields.next() {
        Some(r) => r,
        None => return false,
    };

    // S3 addresses start with the bucket name; everything else with a type
    // qualifier such as `log-group:` or `project/`
    let name = if header[2] == "s3" {
        resource
    } else {
        match resource.find([':', '/']) {
            Some(idx) => &resource[idx + 1..],
            None => resource,
        }
    };
    name.trim_matches(['/', ':']).len() >= MIN_NAME_PREFIX
}

/// Shortest literal name prefix that counts as naming a resource (a bucket name
/// has at least three characters)
const MIN_NAME_PREFIX: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(PatternMatcher::matches("arn:aws:s3:::site", "arn:aws:s3:::site"));
        assert!(!PatternMatcher::matches("arn:aws:s3:::site", "arn:aws:s3:::site2"));
    }

    #[test]
    fn test_star_crosses_separators() {
        assert!(PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::site/a/b/c.html"));
        assert!(PatternMatcher::matches(
            "arn:aws:logs:us-east-1:123456789012:log-group:/aws/codebuild/docs:*",
            "arn:aws:logs:us-east-1:123456789012:log-group:/aws/codebuild/docs:log-stream:x"
        ));
        assert!(!PatternMatcher::matches("arn:aws:s3:::site/*", "arn:aws:s3:::site"));
    }

    #[test]
    fn test_question_mark() {
        assert!(PatternMatcher::matches("arn:aws:s3:::site-?", "arn:aws:s3:::site-a"));
        assert!(!PatternMatcher::matches("arn:aws:s3:::site-?", "arn:aws:s3:::site-ab"));
    }

    #[test]
    fn test_multiple_stars() {
        assert!(PatternMatcher::matches("arn:*:s3:::*-logs/*", "arn:aws:s3:::prod-logs/2024/app.log"));
        assert!(!PatternMatcher::matches("arn:*:s3:::*-logs/*", "arn:aws:s3:::prod-data/app.log"));
        assert!(PatternMatcher::matches("*", "anything"));
        assert!(PatternMatcher::matches("**", ""));
    }

    fn classify(raw: &str) -> Result<ResourcePattern> {
        ResourcePattern::classify(&Template::parse(raw).unwrap())
    }

    #[test]
    fn test_classify_scoped() {
        assert_eq!(classify("*").unwrap(), ResourcePattern::Any);
        assert_eq!(classify("arn:aws:s3:::site").unwrap(), ResourcePattern::Exact);
        assert_eq!(classify("${site.arn}").unwrap(), ResourcePattern::Exact);
        assert_eq!(classify("${site.arn}/*").unwrap(), ResourcePattern::Prefix);
        assert_eq!(
            classify("arn:aws:s3:::codepipeline-us-east-1-*").unwrap(),
            ResourcePattern::Prefix
        );
        assert_eq!(
            classify("arn:aws:logs:us-east-1:123456789012:log-group:/aws/codebuild/docs:*").unwrap(),
            ResourcePattern::Prefix
        );
        assert_eq!(
            classify("arn:aws:s3:::${site.id}/*").unwrap(),
            ResourcePattern::Prefix
        );
        assert_eq!(
            classify("arn:aws:s3:::docs.example.com/*").unwrap(),
            ResourcePattern::Prefix
        );
    }

    #[test]
    fn test_classify_unscoped() {
        assert!(classify("arn:aws:s3:::*").is_err());
        assert!(classify("arn:aws:*").is_err());
        assert!(classify("arn:aws:logs:us-east-1:123456789012:log-group:*").is_err());
        assert!(classify("arn:aws:codebuild:us-east-1:123456789012:project/*").is_err());
        assert!(classify("site*").is_err());

        // A letter or a bare separator is not a name
        assert!(classify("arn:aws:s3:::a*").is_err());
        assert!(classify("arn:aws:s3:::/*").is_err());
        assert!(classify("arn:aws:logs:us-east-1:123456789012:log-group:/*").is_err());
        assert!(classify("arn:aws:logs:us-east-1:123456789012:log-group:x*").is_err());
        assert!(classify("arn:aws:codebuild:us-east-1:123456789012:project/d*").is_err());
        assert!(classify("arn:aws:s3:::doc*").is_ok());
    }
}
