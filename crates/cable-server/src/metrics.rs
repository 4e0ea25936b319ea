//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use cable_pubsub::{BROADCASTS_TOTAL, BUS_SUBSCRIPTIONS_ACTIVE};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Connections that completed `connect` (counter).
pub const CONNECTIONS_TOTAL: &str = "cable_connections_total";
/// Open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "cable_connections_active";
/// Connections refused by `connect` (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "cable_connections_rejected_total";
/// Confirmed channel subscriptions (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "cable_subscriptions_active";
/// Failed or panicked worker jobs (counter).
pub const WORKER_ERRORS_TOTAL: &str = "cable_worker_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTIONS_REJECTED_TOTAL,
            SUBSCRIPTIONS_ACTIVE,
            BROADCASTS_TOTAL,
            WORKER_ERRORS_TOTAL,
            BUS_SUBSCRIPTIONS_ACTIVE,
        ];
        for name in names {
            assert!(
                name.starts_with("cable_")
                    && name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case with the cable_ prefix"
            );
        }
    }
}
