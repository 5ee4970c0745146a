mod controller;
mod counter;
mod fetcher;
mod registry;
mod store;
mod traits;
pub mod types;

pub use controller::FilterController;
pub use counter::RuleCounter;
pub use fetcher::HttpFetcher;
pub use registry::{Registry, SlotKey};
pub use store::{ContentStore, StagedContent};
pub use traits::{FetchError, Fetcher};
pub use types::{FilterEntry, ListFlags, ModifyOutcome, RefreshOutcome, RefreshSummary};
