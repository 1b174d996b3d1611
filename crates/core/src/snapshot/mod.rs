//! Vault ACL snapshots: capture from the source account and the persisted
//! document that carries them to a later `replay` run.

pub mod capture;
pub mod store;

pub use capture::{CapturedSnapshot, SnapshotBoard, SnapshotOutcome, Snapshotter};
pub use store::SnapshotDocument;
