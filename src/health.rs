use serde::Serialize;
use std::fmt::{Display, Formatter};
use transfer_queue::QueueStats;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
}

impl HealthState {
    /// Failed or abandoned transfers need an operator's attention
    /// but do not stop the relay from accepting uploads.
    pub fn from_queue(stats: &QueueStats) -> Self {
        if stats.failed > 0 || stats.abandoned > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

impl Display for HealthState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "Healthy"),
            HealthState::Degraded => write!(f, "Degraded"),
            HealthState::Failed => write!(f, "Failed"),
        }
    }
}
