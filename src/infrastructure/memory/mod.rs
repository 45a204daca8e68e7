//! In-memory collaborators
//!
//! Account, peer link and session directory implementations that need no
//! network or media engine. Used by the demo binary and the tests.

pub mod account;
pub mod directory;
pub mod peer_link;

pub use account::MemoryAccount;
pub use directory::SessionDirectory;
pub use peer_link::{MemoryBehavior, MemoryPeerLink, MemoryPeerLinkFactory};
