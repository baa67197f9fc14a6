pub mod portal;
pub mod response;
pub mod ris_client;

pub use portal::{PortalConnector, PortalOutcome, PortalSession, QueryParams};
pub use response::{parse_inquiry, InquiryPage, PageVerdict};
pub use ris_client::{RisConnector, RisPortalSession};
