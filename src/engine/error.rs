use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The stay overlaps an existing booking (its id).
    Conflict(Ulid),
    InvalidInterval {
        check_in: Ms,
        check_out: Ms,
    },
    CapacityExceeded {
        capacity: u32,
        guests: u32,
    },
    HasBookings(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::InvalidInterval {
                check_in,
                check_out,
            } => write!(
                f,
                "invalid interval: check-in {check_in} must be before check-out {check_out}"
            ),
            EngineError::CapacityExceeded { capacity, guests } => {
                write!(f, "room sleeps {capacity}, {guests} guests requested")
            }
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete room {id}: has active bookings")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
