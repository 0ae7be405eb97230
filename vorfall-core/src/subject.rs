//! The subject grammar.
//!
//! Subjects are hierarchical identifiers of the form `segment('/'segment)*`
//! where a segment is one or more ASCII letters, digits, or hyphens. The
//! first two segments (`entity/id`) identify the stream an event belongs to;
//! the first segment names the physical collection.
//!
//! [`Subject`] and [`StreamSubject`] are distinct nominal types whose only
//! constructors run the grammar, so a validated value can be trusted at
//! every later boundary (including deserialization of stored documents).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed subject or a subject of the wrong arity.
///
/// Reported before any I/O; receiving this is a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid subject format `{subject}`: {reason}")]
pub struct InvalidSubjectFormat {
    /// The offending input, verbatim.
    pub subject: String,
    /// Human-readable description of the violation.
    pub reason: &'static str,
}

impl InvalidSubjectFormat {
    fn new(subject: impl Into<String>, reason: &'static str) -> Self {
        Self {
            subject: subject.into(),
            reason,
        }
    }
}

/// Validate the segment grammar and return the number of segments.
///
/// O(|s|) over the raw bytes; no allocation.
fn count_segments(s: &str) -> Result<usize, &'static str> {
    if s.is_empty() {
        return Err("subject must not be empty");
    }
    let mut segments = 1usize;
    let mut segment_len = 0usize;
    for byte in s.bytes() {
        match byte {
            b'/' => {
                if segment_len == 0 {
                    return Err("segments must not be empty");
                }
                segments += 1;
                segment_len = 0;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => segment_len += 1,
            _ => return Err("segments may only contain letters, digits, and hyphens"),
        }
    }
    if segment_len == 0 {
        return Err("segments must not be empty");
    }
    Ok(segments)
}

/// A validated hierarchical subject.
///
/// Event subjects carry two or more segments; the leading two identify the
/// stream. [`Subject::parse`] additionally accepts one-segment subjects for
/// legacy callers; derived operations such as [`Subject::stream_subject`]
/// reject those. New code should prefer [`Subject::parse_strict`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Parse a subject, accepting one-segment values for compatibility.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubjectFormat`] if the input is empty, contains an
    /// empty segment (leading, trailing, or consecutive `/`), or contains a
    /// character outside `[A-Za-z0-9-]`.
    pub fn parse(subject: impl Into<String>) -> Result<Self, InvalidSubjectFormat> {
        let subject = subject.into();
        match count_segments(&subject) {
            Ok(_) => Ok(Self(subject)),
            Err(reason) => Err(InvalidSubjectFormat::new(subject, reason)),
        }
    }

    /// Parse a subject, rejecting one-segment values.
    ///
    /// This is the intended contract for event subjects: at least
    /// `entity/id`, so a stream subject is always derivable.
    ///
    /// # Errors
    ///
    /// As [`Subject::parse`], plus [`InvalidSubjectFormat`] for single-segment
    /// input.
    pub fn parse_strict(subject: impl Into<String>) -> Result<Self, InvalidSubjectFormat> {
        let subject = subject.into();
        match count_segments(&subject) {
            Ok(n) if n >= 2 => Ok(Self(subject)),
            Ok(_) => Err(InvalidSubjectFormat::new(
                subject,
                "expected at least two segments",
            )),
            Err(reason) => Err(InvalidSubjectFormat::new(subject, reason)),
        }
    }

    /// The raw subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The collection this subject maps to: its first segment.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// The two-segment stream subject this subject belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubjectFormat`] if the subject has fewer than two
    /// segments.
    pub fn stream_subject(&self) -> Result<StreamSubject, InvalidSubjectFormat> {
        let mut segments = self.segments();
        match (segments.next(), segments.next()) {
            (Some(entity), Some(id)) => Ok(StreamSubject(format!("{entity}/{id}"))),
            _ => Err(InvalidSubjectFormat::new(
                self.0.clone(),
                "expected at least two segments",
            )),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Subject {
    type Err = InvalidSubjectFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Subject {
    type Error = InvalidSubjectFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

impl From<StreamSubject> for Subject {
    fn from(stream_subject: StreamSubject) -> Self {
        Self(stream_subject.0)
    }
}

/// A validated two-segment stream subject, `entity/id`.
///
/// This is the primary lookup key for stream documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamSubject(String);

impl StreamSubject {
    /// Parse a stream subject: exactly two grammar-valid segments.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSubjectFormat`] on grammar violations or any segment
    /// count other than two.
    pub fn parse(subject: impl Into<String>) -> Result<Self, InvalidSubjectFormat> {
        let subject = subject.into();
        match count_segments(&subject) {
            Ok(2) => Ok(Self(subject)),
            Ok(_) => Err(InvalidSubjectFormat::new(
                subject,
                "expected exactly two segments",
            )),
            Err(reason) => Err(InvalidSubjectFormat::new(subject, reason)),
        }
    }

    /// The raw stream subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The entity segment, which also names the collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// The instance segment.
    #[must_use]
    pub fn instance(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for StreamSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamSubject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for StreamSubject {
    type Err = InvalidSubjectFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StreamSubject {
    type Error = InvalidSubjectFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<StreamSubject> for String {
    fn from(subject: StreamSubject) -> Self {
        subject.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_subject_and_derives_stream_subject() {
        let subject = Subject::parse("veranstaltung/123/erstellt").unwrap();
        assert_eq!(subject.collection(), "veranstaltung");

        let stream = subject.stream_subject().unwrap();
        assert_eq!(stream.as_str(), "veranstaltung/123");
        assert_eq!(stream.collection(), "veranstaltung");
        assert_eq!(stream.instance(), "123");
        assert!(subject.as_str().starts_with(stream.as_str()));
    }

    #[test]
    fn accepts_hyphens_and_mixed_case() {
        let subject = Subject::parse("user-Account/ID-42/Created").unwrap();
        assert_eq!(subject.segments().count(), 3);
    }

    #[test]
    fn rejects_malformed_subjects() {
        for input in ["", "user_test", "user//test", "/user/test", "user/test/", "user test", "user:test"] {
            assert!(Subject::parse(input).is_err(), "expected rejection of {input:?}");
        }
    }

    #[test]
    fn lenient_parse_accepts_single_segment_but_derivations_reject() {
        let subject = Subject::parse("user").unwrap();
        assert_eq!(subject.collection(), "user");
        assert!(subject.stream_subject().is_err());
        assert!(Subject::parse_strict("user").is_err());
    }

    #[test]
    fn stream_subject_requires_exactly_two_segments() {
        assert!(StreamSubject::parse("user/123").is_ok());
        assert!(StreamSubject::parse("user").is_err());
        assert!(StreamSubject::parse("user/123/created").is_err());
    }

    #[test]
    fn serde_round_trip_validates() {
        let subject: Subject = serde_json::from_str("\"user/123/created\"").unwrap();
        assert_eq!(serde_json::to_string(&subject).unwrap(), "\"user/123/created\"");

        let error = serde_json::from_str::<Subject>("\"user//123\"");
        assert!(error.is_err());
    }
}
