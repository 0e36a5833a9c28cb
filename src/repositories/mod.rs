pub(crate) mod catalog;
pub(crate) mod level_attempts;
pub(crate) mod memory;
pub(crate) mod period_records;
pub(crate) mod postgres;
pub(crate) mod store;
