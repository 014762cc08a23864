//! Bucket locators
//!
//! A locator is the canonical `scheme://container/path` address of a bucket
//! or of an object inside it.

use std::fmt;

use crate::{Error, Result};

const SCHEME_DELIMITER: &str = "://";

/// Parsed `scheme://container[/path]` URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketLocator {
    scheme: String,
    container: String,
    object_path: String,
}

impl BucketLocator {
    pub fn new(
        scheme: impl Into<String>,
        container: impl Into<String>,
        object_path: impl AsRef<str>,
    ) -> Result<Self> {
        let scheme = scheme.into();
        let container = container.into();
        let rendered = format!("{}{}{}", scheme, SCHEME_DELIMITER, container);

        if scheme.is_empty() {
            return Err(Error::invalid_url(rendered, "missing scheme"));
        }
        if container.is_empty() {
            return Err(Error::invalid_url(rendered, "missing bucket name"));
        }
        if container.contains(SCHEME_DELIMITER) || container.contains('/') {
            return Err(Error::invalid_url(
                rendered,
                "bucket name must not contain a path or scheme delimiter",
            ));
        }

        Ok(Self {
            scheme,
            container,
            object_path: normalize_path(object_path.as_ref()),
        })
    }

    /// Parse a locator from its URL form
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once(SCHEME_DELIMITER)
            .ok_or_else(|| Error::invalid_url(url, "expected scheme://bucket[/path]"))?;

        let (container, path) = rest.split_once('/').unwrap_or((rest, ""));

        Self::new(scheme, container, path).map_err(|e| match e {
            Error::InvalidUrl { reason, .. } => Error::invalid_url(url, reason),
            other => other,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Object path inside the container, without leading or trailing slashes
    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Locator of the bucket itself, dropping any object path
    pub fn bucket(&self) -> Self {
        Self {
            scheme: self.scheme.clone(),
            container: self.container.clone(),
            object_path: String::new(),
        }
    }

    /// Append `name` to the object path
    pub fn join(&self, name: &str) -> Self {
        let name = normalize_path(name);
        let object_path = match (self.object_path.is_empty(), name.is_empty()) {
            (true, _) => name,
            (false, true) => self.object_path.clone(),
            (false, false) => format!("{}/{}", self.object_path, name),
        };

        Self {
            scheme: self.scheme.clone(),
            container: self.container.clone(),
            object_path,
        }
    }

    /// Whether both locators address the same bucket
    pub fn same_bucket(&self, other: &Self) -> bool {
        self.scheme == other.scheme && self.container == other.container
    }
}

impl fmt::Display for BucketLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_DELIMITER, self.container)?;
        if !self.object_path.is_empty() {
            write!(f, "/{}", self.object_path)?;
        }
        Ok(())
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
