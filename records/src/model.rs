//! Typed entities the dispatch engine reads and mutates.
//!
//! Rows are plain structs; the only writes the engine performs are the
//! named mutations on `StoreTx` (`set_assigned`, `increment_capacity`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ZoneId = i64;
pub type DelivererId = i64;
pub type PackageId = i64;

/// Lifecycle of a package.
///
/// `pending -> assigned -> in_transit -> delivered`, with
/// `pending -> cancelled` as the alternate terminal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Pending => "pending",
            PackageStatus::Assigned => "assigned",
            PackageStatus::InTransit => "in_transit",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is an edge of the package state machine.
    pub fn can_transition_to(&self, next: PackageStatus) -> bool {
        matches!(
            (self, next),
            (PackageStatus::Pending, PackageStatus::Assigned)
                | (PackageStatus::Pending, PackageStatus::Cancelled)
                | (PackageStatus::Assigned, PackageStatus::InTransit)
                | (PackageStatus::InTransit, PackageStatus::Delivered)
        )
    }

    /// Statuses in which a package must be bound to a deliverer.
    pub fn requires_deliverer(&self) -> bool {
        !matches!(self, PackageStatus::Pending | PackageStatus::Cancelled)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PackageStatus::Pending),
            "assigned" => Ok(PackageStatus::Assigned),
            "in_transit" => Ok(PackageStatus::InTransit),
            "delivered" => Ok(PackageStatus::Delivered),
            "cancelled" => Ok(PackageStatus::Cancelled),
            other => Err(anyhow::anyhow!("Invalid PackageStatus value: {}", other)),
        }
    }
}

/// Geographic scoping unit. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub city: String,
    pub created_at: DateTime<Utc>,
}

/// A delivery agent with a capacity ceiling.
///
/// Invariant: `current_capacity <= max_capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverer {
    pub id: DelivererId,
    pub name: String,
    /// Business ceiling on simultaneously carried packages. Always > 0.
    pub max_capacity: u32,
    /// Packages currently bound to this deliverer.
    pub current_capacity: u32,
    /// Toggled externally (shift start/end); never by the engine.
    pub is_available: bool,
    pub current_zone_id: Option<ZoneId>,
    /// Registration time; oldest wins selection ties.
    pub created_at: DateTime<Utc>,
}

impl Deliverer {
    pub fn has_free_slot(&self) -> bool {
        self.current_capacity < self.max_capacity
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub tracking_number: String,
    pub zone_id: ZoneId,
    /// Set exactly once by a successful dispatch; never reset by the engine.
    pub deliverer_id: Option<DelivererId>,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
}

impl Package {
    /// `deliverer_id` is set iff the status requires a deliverer.
    pub fn is_consistent(&self) -> bool {
        self.deliverer_id.is_some() == self.status.requires_deliverer()
    }
}

/// Creation payload for a deliverer.
#[derive(Debug, Clone)]
pub struct NewDeliverer {
    pub name: String,
    pub max_capacity: u32,
    pub current_capacity: u32,
    pub is_available: bool,
    pub current_zone_id: Option<ZoneId>,
}

impl NewDeliverer {
    /// An available, empty deliverer in `zone_id`.
    pub fn in_zone(name: impl Into<String>, zone_id: ZoneId, max_capacity: u32) -> Self {
        Self {
            name: name.into(),
            max_capacity,
            current_capacity: 0,
            is_available: true,
            current_zone_id: Some(zone_id),
        }
    }

    pub fn with_load(mut self, current_capacity: u32) -> Self {
        self.current_capacity = current_capacity;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.is_available = false;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_capacity > 0, "max_capacity must be positive");
        anyhow::ensure!(
            self.current_capacity <= self.max_capacity,
            "current_capacity {} exceeds max_capacity {}",
            self.current_capacity,
            self.max_capacity
        );
        Ok(())
    }
}

/// Creation payload for a package. New packages always start `pending`.
#[derive(Debug, Clone)]
pub struct NewPackage {
    pub tracking_number: String,
    pub zone_id: ZoneId,
}

impl NewPackage {
    pub fn new(tracking_number: impl Into<String>, zone_id: ZoneId) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            zone_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(status: PackageStatus, deliverer_id: Option<DelivererId>) -> Package {
        Package {
            id: 1,
            tracking_number: "TRK123".into(),
            zone_id: 1,
            deliverer_id,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for s in [
            PackageStatus::Pending,
            PackageStatus::Assigned,
            PackageStatus::InTransit,
            PackageStatus::Delivered,
            PackageStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<PackageStatus>().unwrap(), s);
        }
        assert!("shipped".parse::<PackageStatus>().is_err());
    }

    #[test]
    fn state_machine_is_linear() {
        use PackageStatus::*;

        assert!(Pending.can_transition_to(Assigned));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Assigned.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Delivered));

        assert!(!Pending.can_transition_to(InTransit));
        assert!(!Assigned.can_transition_to(Pending));
        assert!(!Assigned.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Assigned));
    }

    #[test]
    fn deliverer_binding_invariant() {
        assert!(package(PackageStatus::Pending, None).is_consistent());
        assert!(package(PackageStatus::Cancelled, None).is_consistent());
        assert!(package(PackageStatus::Assigned, Some(3)).is_consistent());
        assert!(package(PackageStatus::Delivered, Some(3)).is_consistent());

        assert!(!package(PackageStatus::Pending, Some(3)).is_consistent());
        assert!(!package(PackageStatus::InTransit, None).is_consistent());
    }

    #[test]
    fn free_slot_tracks_capacity() {
        let mut d = Deliverer {
            id: 1,
            name: "Ahmed".into(),
            max_capacity: 2,
            current_capacity: 1,
            is_available: true,
            current_zone_id: Some(1),
            created_at: Utc::now(),
        };
        assert!(d.has_free_slot());
        assert_eq!(d.remaining_capacity(), 1);

        d.current_capacity = 2;
        assert!(!d.has_free_slot());
        assert_eq!(d.remaining_capacity(), 0);
    }

    #[test]
    fn new_deliverer_validation() {
        assert!(NewDeliverer::in_zone("a", 1, 5).validate().is_ok());
        assert!(NewDeliverer::in_zone("a", 1, 5).with_load(5).validate().is_ok());
        assert!(NewDeliverer::in_zone("a", 1, 0).validate().is_err());
        assert!(NewDeliverer::in_zone("a", 1, 5).with_load(6).validate().is_err());
    }
}
