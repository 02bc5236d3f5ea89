//! Passive health checking.
//!
//! Outcomes of real calls feed the endpoint's tracker. Only failures that
//! say something about the endpoint itself count: a business error or a
//! bad request is a healthy server answering.

use tonic::{Code, Status};

/// Whether a call result says the endpoint could not be reached.
pub fn is_transport_failure(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable)
}
