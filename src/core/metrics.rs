use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;
use crate::db::types::LevelStatus;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_transition(from: LevelStatus, to: LevelStatus) {
    metrics::counter!(
        "level_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub(crate) fn record_period_save(changed: bool) {
    metrics::counter!(
        "period_records_saved_total",
        "changed" => if changed { "true" } else { "false" }
    )
    .increment(1);
}

pub(crate) fn record_sweep(processed: usize, transitioned: usize) {
    metrics::counter!("finalize_sweep_processed_total").increment(processed as u64);
    metrics::counter!("finalize_sweep_transitioned_total").increment(transitioned as u64);
}
