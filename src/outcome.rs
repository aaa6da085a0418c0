/// Result code returned to the pipeline for every invocation.
///
/// Exactly one of these is produced per call, on every path. Errors raised
/// while building, sending, or decoding an exchange never escape the entry
/// points as anything other than one of these codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The remote API accepted the request without attribute updates.
    Ok,
    /// The remote API accepted the request and the decoded body produced
    /// at least one attribute update.
    Updated,
    /// The remote API rejected the user (401 with a decodable body).
    Reject,
    /// The resource was not found (404 or 410).
    NotFound,
    /// The request was malformed from the API's point of view, or the
    /// invocation could not be built.
    Invalid,
    /// The remote API reported the user as administratively locked (403).
    UserLock,
    /// Transport failure, server error, or undecodable response.
    Fail,
    /// The phase is not configured; nothing was attempted.
    Noop,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Updated => "updated",
            Self::Reject => "reject",
            Self::NotFound => "not-found",
            Self::Invalid => "invalid",
            Self::UserLock => "user-locked",
            Self::Fail => "fail",
            Self::Noop => "no-op",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
