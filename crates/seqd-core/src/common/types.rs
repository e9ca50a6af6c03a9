//! # Bucket identity and allocation results
//!
//! A bucket is a named sub-sequence of IDs scoped by an application name and
//! a queue name. The same [`BucketKey`] addresses the bucket's buffer in the
//! fast store and its counter row in the durable store.

use crate::{Error, Result};
use core::fmt;

/// Separator used when rendering a [`BucketKey`] into a fast-store key.
///
/// Neither component of a key may contain it, so two different
/// (application, bucket) pairs can never render to the same string.
pub const KEY_SEPARATOR: char = ':';

/// Default namespace prepended to every fast-store key.
pub const DEFAULT_NAMESPACE: &str = "SeqGend";

/// Composite identifier of a bucket: (application name, bucket name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    app: String,
    bucket: String,
}

impl BucketKey {
    /// Builds a key, rejecting empty names and names containing
    /// [`KEY_SEPARATOR`].
    pub fn new(app: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        let app = app.into();
        let bucket = bucket.into();
        validate_component("AppName", &app)?;
        validate_component("IdQueue", &bucket)?;
        Ok(Self { app, bucket })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Renders the fast-store key `<namespace>:<app>:<bucket>`.
    pub fn namespaced(&self, namespace: &str) -> String {
        let mut key =
            String::with_capacity(namespace.len() + self.app.len() + self.bucket.len() + 2);
        key.push_str(namespace);
        key.push(KEY_SEPARATOR);
        key.push_str(&self.app);
        key.push(KEY_SEPARATOR);
        key.push_str(&self.bucket);
        key
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.app, self.bucket)
    }
}

fn validate_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::protocol(format!("{field} must not be empty")));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(Error::protocol(format!(
            "{field} must not contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Outcome of popping the head of a bucket's buffer.
///
/// `Exhausted` is a distinct state, not a reserved numeric value: `Issued(0)`
/// and `Exhausted` never compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Allocation {
    /// A value that has now been handed out and will never be handed out again.
    Issued(u64),
    /// The buffer was empty. The caller should retry after the next refill.
    Exhausted,
}

impl Allocation {
    pub const fn id(self) -> Option<u64> {
        match self {
            Self::Issued(id) => Some(id),
            Self::Exhausted => None,
        }
    }

    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

impl From<Option<u64>> for Allocation {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Exhausted, Self::Issued)
    }
}
