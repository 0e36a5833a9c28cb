pub(crate) mod errors;
pub(crate) mod grade_aggregator;
pub(crate) mod key_locks;
pub(crate) mod level_machine;
pub(crate) mod period_records;
pub(crate) mod progress_query;
pub(crate) mod progression;
