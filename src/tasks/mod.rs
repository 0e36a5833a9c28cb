pub(crate) mod finalize_sweep;
pub(crate) mod scheduler;
