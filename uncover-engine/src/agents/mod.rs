//! Built-in source agents.
//!
//! Each agent implements [`crate::agent::Agent`]. Paginated sources share the
//! driver in [`paging`].

pub mod fofa;
pub mod paging;
pub mod shodan;
pub mod shodan_idb;

pub use fofa::FofaAgent;
pub use shodan::ShodanAgent;
pub use shodan_idb::ShodanIdbAgent;
