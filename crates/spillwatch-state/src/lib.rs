//! Shared live state: the single-slot frame store and the detection ledger.

pub mod evidence;
pub mod frame_store;
pub mod ledger;

pub use evidence::{persistence_error, EvidenceStore, FsEvidenceStore};
pub use frame_store::FrameStore;
pub use ledger::DetectionLedger;
