//! Fallible decoding of raw input into typed values.
//!
//! A [`Decoder`] turns a raw value into a typed one or reports every
//! problem it found as an [`IssueList`]. Decoding is synchronous;
//! [`Effect::decode`] runs a decoder inside an effect so the issues become
//! the effect's typed failure.
//!
//! ```
//! use effectus::decode::{self, IssueList};
//! use effectus::{Effect, RuntimeBuilder};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Clone, PartialEq, Deserialize)]
//! struct Job {
//!     id: u32,
//! }
//!
//! let rt = RuntimeBuilder::current_thread().build().unwrap();
//! let job = rt.run(Effect::decode(decode::json::<Job>(), r#"{"id": 7}"#.to_string()));
//! assert_eq!(job.value(), Some(&Job { id: 7 }));
//!
//! let bad = rt.run(Effect::decode(decode::json::<Job>(), "{}".to_string()));
//! let issues: &IssueList = bad.cause().and_then(|c| c.first_failure()).unwrap();
//! assert_eq!(issues.len(), 1);
//! ```

use crate::effect::Effect;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// One problem found while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Location of the problem within the input, such as `items[2].name`.
    /// Empty for the input as a whole.
    pub path: String,
    /// What is wrong.
    pub message: String,
}

impl Issue {
    /// An issue at `path`.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// An issue with the input as a whole.
    pub fn root(message: impl Into<String>) -> Self {
        Self::new("", message)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Every issue found while decoding one input. Never empty when produced
/// by a failing decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueList {
    issues: Vec<Issue>,
}

impl IssueList {
    /// An empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Appends an issue.
    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Number of issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns true if there are no issues.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Iterates over the issues in the order found.
    pub fn iter(&self) -> std::slice::Iter<'_, Issue> {
        self.issues.iter()
    }
}

impl From<Issue> for IssueList {
    fn from(issue: Issue) -> Self {
        Self {
            issues: vec![issue],
        }
    }
}

impl FromIterator<Issue> for IssueList {
    fn from_iter<I: IntoIterator<Item = Issue>>(iter: I) -> Self {
        Self {
            issues: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for IssueList {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl<'a> IntoIterator for &'a IssueList {
    type Item = &'a Issue;
    type IntoIter = std::slice::Iter<'a, Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.iter()
    }
}

impl fmt::Display for IssueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.issues.as_slice() {
            [] => f.write_str("no issues"),
            [only] => write!(f, "{only}"),
            issues => {
                write!(f, "{} issues", issues.len())?;
                for issue in issues {
                    write!(f, "\n  - {issue}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for IssueList {}

/// Turns a `Raw` input into a typed value.
pub trait Decoder<Raw>: Send + Sync {
    /// The decoded type.
    type Output;

    /// Decodes `raw`, reporting every issue on failure.
    fn decode(&self, raw: &Raw) -> Result<Self::Output, IssueList>;
}

impl<Raw, T, F> Decoder<Raw> for F
where
    F: Fn(&Raw) -> Result<T, IssueList> + Send + Sync,
{
    type Output = T;

    fn decode(&self, raw: &Raw) -> Result<T, IssueList> {
        self(raw)
    }
}

/// Decodes JSON text into `T` with `serde_json`.
#[derive(Debug)]
pub struct Json<T> {
    target: PhantomData<fn() -> T>,
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Json<T> {}

/// A decoder from JSON text into `T`.
#[must_use]
pub const fn json<T: DeserializeOwned>() -> Json<T> {
    Json {
        target: PhantomData,
    }
}

impl<T, Raw> Decoder<Raw> for Json<T>
where
    T: DeserializeOwned,
    Raw: AsRef<str>,
{
    type Output = T;

    fn decode(&self, raw: &Raw) -> Result<T, IssueList> {
        serde_json::from_str(raw.as_ref()).map_err(|err| {
            let path = if err.line() == 0 {
                String::new()
            } else {
                format!("line {} column {}", err.line(), err.column())
            };
            Issue::new(path, err.to_string()).into()
        })
    }
}

impl<A> Effect<A, IssueList>
where
    A: Send + 'static,
{
    /// Runs `decoder` on `raw` each time the effect runs. Issues become the
    /// typed failure; a panicking decoder dies.
    #[must_use]
    pub fn decode<Raw, D>(decoder: D, raw: Raw) -> Self
    where
        Raw: Send + Sync + 'static,
        D: Decoder<Raw, Output = A> + 'static,
    {
        Self::try_sync(move || decoder.decode(&raw))
    }
}
