mod grouping;
mod session;

pub use grouping::{group_add_accounts, AccountGroups, Section, SectionId};
pub use session::{ScanController, ScanSession, ScanStatus, ScannedAccountsUpdate};
