use std::fmt;

use records::model::ZoneId;
use thiserror::Error;

/// Entity a dispatch attempt could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Deliverer,
    Package,
    /// Selection found no candidate in the package's zone.
    AvailableDelivererInZone(ZoneId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Deliverer => f.write_str("deliverer"),
            Missing::Package => f.write_str("package"),
            Missing::AvailableDelivererInZone(zone) => {
                write!(f, "available deliverer in zone {zone}")
            }
        }
    }
}

/// Precondition violated by current (locked) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    DelivererUnavailable,
    CapacityExceeded,
    AlreadyAssigned,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictReason::DelivererUnavailable => "deliverer is not available",
            ConflictReason::CapacityExceeded => "deliverer at max capacity",
            ConflictReason::AlreadyAssigned => "package already assigned",
        };
        f.write_str(s)
    }
}

/// Why a dispatch attempt failed.
///
/// `NotFound` and `Conflict` are expected outcomes; `Internal` wraps a
/// persistence failure. All three are returned only after rollback.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(Missing),

    #[error("{0}")]
    Conflict(ConflictReason),

    #[error("assignment failed: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Stable failure code surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    DelivererNotFound,
    PackageNotFound,
    NoAvailableDelivererInZone,
    DelivererUnavailable,
    CapacityExceeded,
    AlreadyAssigned,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DelivererNotFound => "deliverer_not_found",
            FailureKind::PackageNotFound => "package_not_found",
            FailureKind::NoAvailableDelivererInZone => "no_available_deliverer_in_zone",
            FailureKind::DelivererUnavailable => "deliverer_unavailable",
            FailureKind::CapacityExceeded => "capacity_exceeded",
            FailureKind::AlreadyAssigned => "already_assigned",
            FailureKind::InternalError => "internal_error",
        }
    }

    /// Conventional HTTP status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            FailureKind::DelivererNotFound | FailureKind::PackageNotFound => 404,
            FailureKind::NoAvailableDelivererInZone
            | FailureKind::DelivererUnavailable
            | FailureKind::CapacityExceeded
            | FailureKind::AlreadyAssigned => 409,
            FailureKind::InternalError => 500,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::NotFound(Missing::Deliverer) => FailureKind::DelivererNotFound,
            DispatchError::NotFound(Missing::Package) => FailureKind::PackageNotFound,
            DispatchError::NotFound(Missing::AvailableDelivererInZone(_)) => {
                FailureKind::NoAvailableDelivererInZone
            }
            DispatchError::Conflict(ConflictReason::DelivererUnavailable) => {
                FailureKind::DelivererUnavailable
            }
            DispatchError::Conflict(ConflictReason::CapacityExceeded) => {
                FailureKind::CapacityExceeded
            }
            DispatchError::Conflict(ConflictReason::AlreadyAssigned) => {
                FailureKind::AlreadyAssigned
            }
            DispatchError::Internal(_) => FailureKind::InternalError,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}
