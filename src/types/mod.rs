//! Data types for the relay
//!
//! Wire-level records (events, filters) and the access-policy model.

mod event;
mod filter;
mod policy;
mod relay_info;

pub use event::{Event, KindClass, KIND_CONTACTS, KIND_DELETION, KIND_METADATA};
pub use filter::Filter;
pub use policy::{DefaultPolicy, Policy, PolicyUpdate, WriteDenied};
pub use relay_info::{RelayInformation, RelayInformationUpdate};
