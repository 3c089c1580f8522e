//! FinePay Core - Domain types
//!
//! This crate contains the record types shared by every FinePay component:
//! - `CitizenProfile` and the hashed identity it is keyed by
//! - `DemeritBalance` / `MeritBalance` and the append-only `PointsHistory` ledger
//! - `SuspensionRecord` and the derived `LicenseStatus`
//! - `Ticket` and the late-fee schedule (`LateFeeConfiguration`, `LateFeeRule`, `LateFeeEvent`)
//! - `Clock`: injected wall clock so every temporal window is testable

pub mod clock;
pub mod error;
pub mod government;
pub mod identity;
pub mod latefee;
pub mod points;
pub mod profile;
pub mod suspension;
pub mod ticket;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{BatchItemError, CoreError, CoreResult};
pub use government::{Government, GovernmentStatus};
pub use identity::{hash_identifier, verify_partial_identifier, CitizenIdentity, IdentityKind};
pub use latefee::{
    round_money, FeeComponent, FeeStructure, FeeTier, LateFeeConfiguration, LateFeeEvent,
    LateFeeRule,
};
pub use points::{
    DemeritBalance, EntryStatus, MeritBalance, PenaltyRule, PointSource, PointType,
    PointsHistory, TransactionType,
};
pub use profile::{CitizenProfile, ContactInfo};
pub use suspension::{LicenseStatus, SanctionSource, SanctionStatus, SanctionType, SuspensionRecord};
pub use ticket::{Ticket, TicketStatus};

/// Days a demerit entry stays in the rolling window.
pub const DEMERIT_VALIDITY_DAYS: i64 = 365;

/// Length of an automatic suspension.
pub const SUSPENSION_DAYS: i64 = 365;

/// Length of an automatic revocation.
pub const REVOCATION_DAYS: i64 = 730;
