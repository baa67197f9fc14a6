pub mod batch;
pub mod district;
pub mod query;
pub mod record;
pub mod roc_date;

pub use batch::{
    BatchId, BatchOutcome, BatchRun, BatchStatus, DistrictQueryResult, DistrictReport,
    DistrictStatus, NotificationRecipient,
};
pub use district::{find_district, resolve_districts, District, TAIPEI_CITY_CODE, TAIPEI_CITY_NAME, TAIPEI_DISTRICTS};
pub use query::{BatchPlan, BatchQueryRequest, BatchQueryResponse};
pub use record::{edit_type_name, HouseholdRecord, EDIT_TYPE_NAMES};
pub use roc_date::{DateRange, RocDate};
