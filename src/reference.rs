use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Registry domain assumed when an image reference carries none.
pub const DEFAULT_DOMAIN: &str = "docker.io";

const OFFICIAL_NAMESPACE: &str = "library";

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Repository path per the distribution reference grammar: slash-separated
    // lowercase components with ./_/- separators between alphanumeric runs.
    Regex::new(
        r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$",
    )
    .unwrap()
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap());

static DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[A-Fa-f0-9]{32,}$").unwrap());

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("invalid image reference '{0}'")]
    Invalid(String),
}

/// A parsed container image reference: domain, repository path and an
/// optional tag and/or digest. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parses `name[:tag][@digest]`, with or without a leading `docker://`
    /// transport marker. A bare name acquires the default public-registry
    /// domain (and the `library/` namespace for single-component names).
    /// Absence of tag and digest is preserved; see [`ImageReference::canonical`].
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let s = input.strip_prefix("docker://").unwrap_or(input);
        if s.is_empty() {
            return Err(ReferenceError::Invalid(input.to_string()));
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (s, None),
        };

        // A colon after the last slash separates the tag; a colon before it
        // belongs to a registry port.
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if idx > rest.rfind('/').unwrap_or(0) || !rest.contains('/') => {
                (&rest[..idx], Some(rest[idx + 1..].to_string()))
            }
            _ => (rest, None),
        };

        let (domain, path) = match name.split_once('/') {
            Some((first, remainder)) if is_domain(first) => {
                (first.to_string(), remainder.to_string())
            }
            Some(_) => (DEFAULT_DOMAIN.to_string(), name.to_string()),
            None => (
                DEFAULT_DOMAIN.to_string(),
                format!("{OFFICIAL_NAMESPACE}/{name}"),
            ),
        };

        if path.is_empty() || !PATH_RE.is_match(&path) {
            return Err(ReferenceError::Invalid(input.to_string()));
        }
        if let Some(tag) = &tag {
            if !TAG_RE.is_match(tag) {
                return Err(ReferenceError::Invalid(input.to_string()));
            }
        }
        if let Some(digest) = &digest {
            if !DIGEST_RE.is_match(digest) {
                return Err(ReferenceError::Invalid(input.to_string()));
            }
        }

        Ok(ImageReference {
            domain,
            path,
            tag,
            digest,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Fully-qualified reference with an explicit tag or digest; a reference
    /// that carried neither defaults to `:latest` here.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}/{}", self.domain, self.path);
        match (&self.tag, &self.digest) {
            (Some(tag), Some(digest)) => {
                out.push_str(&format!(":{tag}@{digest}"));
            }
            (Some(tag), None) => out.push_str(&format!(":{tag}")),
            (None, Some(digest)) => out.push_str(&format!("@{digest}")),
            (None, None) => out.push_str(":latest"),
        }
        out
    }

    /// Domain and repository path without tag or digest.
    pub fn trimmed(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn is_domain(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}
