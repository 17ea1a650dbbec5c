mod row;
mod sql_value;

pub use row::{QueryResult, RawQueryResult, Row};
pub(crate) use sql_value::{date_to_epoch_millis, epoch_millis_to_date};
pub use sql_value::SqlValue;
