use forwarder_domain::services::telemetry::TelemetryGuard;
use forwarder_domain::ActivityRecorder;
use forwarder_monitor::Monitor;

#[derive(Clone)]
pub struct AppState {
    monitor: Monitor,
    telemetry: TelemetryGuard,
}

impl AppState {
    pub fn new(monitor: Monitor, telemetry: TelemetryGuard) -> Self {
        Self { monitor, telemetry }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        self.monitor.recorder()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
