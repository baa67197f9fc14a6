pub mod result_store;

pub use result_store::{RecordFilter, ResultStore, StoredHousehold, INTERRUPTED_REASON};
