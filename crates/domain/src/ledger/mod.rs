//! Collaborator interfaces the forwarding core drives: the ledger node and
//! the external co-signer.

mod traits;

pub use traits::*;
