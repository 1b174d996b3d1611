//! Identity mapping between the source and destination accounts.
//!
//! Users are correlated across accounts by email only. The optional CSV
//! mapping file covers users whose address changed; everyone else keeps
//! their source email.

pub mod mapper;
pub mod mapping_file;

pub use mapper::IdentityMapper;
