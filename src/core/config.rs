mod parsing;
mod settings;
mod types;

#[cfg(test)]
pub(crate) use types::ProgressionSettings;
pub(crate) use types::{PassRule, Settings, StoreBackend};
