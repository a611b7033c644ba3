use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::manager::{LifecycleState, ManagerStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub state: LifecycleState,
    pub consumers: usize,
}

impl HealthCheckResponse {
    pub fn from_status(status: &ManagerStatus) -> Self {
        let overall = match status.state {
            LifecycleState::Running => HealthStatus::Healthy,
            LifecycleState::Created
            | LifecycleState::Discovering
            | LifecycleState::Draining => HealthStatus::Degraded,
            LifecycleState::Stopped => HealthStatus::Unhealthy,
        };

        Self {
            status: overall,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            state: status.state,
            consumers: status.consumers,
        }
    }
}
