use http::StatusCode;

use crate::config::Phase;
use crate::outcome::Outcome;

/// What decoding the response body produced, if it was attempted at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// No decode was attempted (status did not call for one, or no
    /// decoder matched the response content type).
    NotAttempted,
    /// The body was malformed for the selected decoder.
    Error,
    /// Decoding succeeded but produced no attribute updates.
    Clean,
    /// Decoding produced one or more attribute updates.
    Updated,
}

/// Whether the classification tables want the body decoded for this
/// status. Decode results for other statuses are ignored.
pub fn decode_wanted(phase: Phase, status: StatusCode) -> bool {
    let code = status.as_u16();
    if code == 204 {
        return false;
    }
    if (200..300).contains(&code) {
        return true;
    }
    // The decision table also decodes 401 bodies so the API can attach
    // reply attributes to a rejection.
    !phase.is_delivery() && code == 401
}

/// Full status table used by the authorize and authenticate phases.
/// Evaluated in order; first match wins.
pub fn classify_decision(status: StatusCode, decode: DecodeOutcome) -> Outcome {
    match status.as_u16() {
        404 | 410 => Outcome::NotFound,
        403 => Outcome::UserLock,
        401 => match decode {
            DecodeOutcome::Error => Outcome::Fail,
            _ => Outcome::Reject,
        },
        204 => Outcome::Ok,
        code if (200..300).contains(&code) => match decode {
            DecodeOutcome::Error => Outcome::Fail,
            DecodeOutcome::Updated => Outcome::Updated,
            DecodeOutcome::NotAttempted | DecodeOutcome::Clean => Outcome::Ok,
        },
        code if (300..500).contains(&code) => Outcome::Invalid,
        _ => Outcome::Fail,
    }
}

/// Reduced table used by the accounting and post-auth phases, which
/// deliver data rather than ask for a decision.
pub fn classify_delivery(status: StatusCode, decode: DecodeOutcome) -> Outcome {
    match status.as_u16() {
        code if code >= 500 => Outcome::Fail,
        204 => Outcome::Ok,
        code if (200..300).contains(&code) => match decode {
            DecodeOutcome::Error => Outcome::Fail,
            DecodeOutcome::Updated => Outcome::Updated,
            DecodeOutcome::NotAttempted | DecodeOutcome::Clean => Outcome::Ok,
        },
        _ => Outcome::Invalid,
    }
}

pub fn classify(phase: Phase, status: StatusCode, decode: DecodeOutcome) -> Outcome {
    if phase.is_delivery() {
        classify_delivery(status, decode)
    } else {
        classify_decision(status, decode)
    }
}

/// Whether response details should be surfaced to the diagnostic log for
/// this outcome.
pub fn error_logged(phase: Phase, status: StatusCode, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Invalid | Outcome::Fail | Outcome::UserLock => true,
        Outcome::Reject => !phase.is_delivery() && !status.is_success(),
        _ => false,
    }
}
