//! Domain building blocks shared by the monitor and API crates: ledger
//! addresses, the held signing credential, configuration, the data model of a
//! forwarding run and the collaborator traits the core drives.

pub mod address;
pub mod config;
pub mod credential;
pub mod ledger;
pub mod model;
pub mod services;

pub use address::{AddressError, LedgerAddress};
pub use credential::{CredentialError, SigningCredential, SIGNATURE_LEN};
pub use ledger::*;
pub use services::activity::{ActivityRecorder, OperatorNotifier};
