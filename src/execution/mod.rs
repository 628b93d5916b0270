pub mod executor;
pub mod load_data;
pub mod sql_result;

pub use executor::execute_sql;
pub use sql_result::SqlResult;
