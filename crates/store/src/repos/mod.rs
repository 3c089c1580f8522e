//! Repository implementations
//!
//! Every function takes `&mut SqliteConnection` so callers decide the unit of
//! work: a pooled connection for reads, `&mut *tx` inside a transaction, or a
//! nested transaction (SAVEPOINT) for batch items.

pub mod points;
pub mod tenants;
pub mod tickets;

pub use points::{BalanceRepo, HistoryRepo, ProfileRepo, SuspensionRepo};
pub use tenants::{GovernmentRepo, PenaltyRuleRepo, PointSettingsRepo};
pub use tickets::{LateFeeConfigRepo, LateFeeEventRepo, TicketRepo};
