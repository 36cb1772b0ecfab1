pub mod backups;
pub mod events;
pub mod proposals;

pub use backups::{checksum, BackupStore};
pub use events::EventStore;
pub use proposals::{CreateOutcome, ProposalStore};
