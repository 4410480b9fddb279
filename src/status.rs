//! Canonical status taxonomy for crawl outcomes.
//!
//! Code `0` means success; every failure class has a distinct code `>= 400`.
//! All codes except [`CrawlStatus::RanTooLong`] are relayed from the work
//! unit's own output. `RanTooLong` is the one status synthesized by the
//! orchestration core itself, when a unit exceeds its time budget and is
//! killed.

use std::fmt;

/// Classification of one work-unit execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    /// The unit completed and returned a well-formed result.
    Success,
    /// The unit exceeded its time budget and was killed by the dispatcher.
    RanTooLong,
    /// The credentials supplied to an authentication-style unit were rejected.
    BadCredentials,
    /// The target account is locked out.
    AccountLocked,
    /// The unit could not confirm whether login succeeded.
    LoginUnconfirmed,
    /// The requested identifier is absent from the catalog.
    SpiderNotFound,
    /// The unit's crawl logic raised an unhandled error (or produced no
    /// parseable output at all).
    CrawlException,
    /// Unit initialization failed before execution began.
    ConstructorFailed,
    /// The unit returned a value not conforming to the expected result shape.
    InvalidReturnType,
    /// A supplied parameter failed the unit's declared validation pattern.
    InvalidArgument,
    /// A failure code relayed from the unit that is not part of the canonical
    /// set. Preserved verbatim so it survives recording.
    Other(i64),
}

impl CrawlStatus {
    /// The numeric code written to `crawl-output.json`.
    pub fn code(&self) -> i64 {
        match self {
            CrawlStatus::Success => 0,
            CrawlStatus::RanTooLong => 400,
            CrawlStatus::BadCredentials => 401,
            CrawlStatus::AccountLocked => 402,
            CrawlStatus::LoginUnconfirmed => 403,
            CrawlStatus::SpiderNotFound => 404,
            CrawlStatus::CrawlException => 410,
            CrawlStatus::ConstructorFailed => 411,
            CrawlStatus::InvalidReturnType => 412,
            CrawlStatus::InvalidArgument => 413,
            CrawlStatus::Other(code) => *code,
        }
    }

    /// Map a numeric code back to its status. Codes outside the canonical set
    /// are preserved as [`CrawlStatus::Other`].
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => CrawlStatus::Success,
            400 => CrawlStatus::RanTooLong,
            401 => CrawlStatus::BadCredentials,
            402 => CrawlStatus::AccountLocked,
            403 => CrawlStatus::LoginUnconfirmed,
            404 => CrawlStatus::SpiderNotFound,
            410 => CrawlStatus::CrawlException,
            411 => CrawlStatus::ConstructorFailed,
            412 => CrawlStatus::InvalidReturnType,
            413 => CrawlStatus::InvalidArgument,
            other => CrawlStatus::Other(other),
        }
    }

    /// Whether this status represents a successful execution.
    pub fn is_success(&self) -> bool {
        matches!(self, CrawlStatus::Success)
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CrawlStatus::Success => "success",
            CrawlStatus::RanTooLong => "ran too long",
            CrawlStatus::BadCredentials => "bad credentials",
            CrawlStatus::AccountLocked => "account locked out",
            CrawlStatus::LoginUnconfirmed => "could not confirm login status",
            CrawlStatus::SpiderNotFound => "spider not found",
            CrawlStatus::CrawlException => "crawl threw exception",
            CrawlStatus::ConstructorFailed => "constructor raised exception",
            CrawlStatus::InvalidReturnType => "invalid return type",
            CrawlStatus::InvalidArgument => "invalid argument",
            CrawlStatus::Other(code) => return write!(f, "unrecognized status {code}"),
        };
        f.write_str(text)
    }
}
