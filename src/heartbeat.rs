#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    Lost,
    Recovered,
}

pub struct DaemonHealth {
    failure_limit: u32,
    consecutive_failures: u32,
    lost: bool,
}

impl DaemonHealth {
    pub fn new(failure_limit: u32) -> Self {
        Self {
            failure_limit: failure_limit.max(1),
            consecutive_failures: 0,
            lost: false,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) -> HealthTransition {
        self.consecutive_failures = 0;
        if std::mem::replace(&mut self.lost, false) {
            HealthTransition::Recovered
        } else {
            HealthTransition::Unchanged
        }
    }

    pub fn record_failure(&mut self) -> HealthTransition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.lost && self.consecutive_failures >= self.failure_limit {
            self.lost = true;
            HealthTransition::Lost
        } else {
            HealthTransition::Unchanged
        }
    }
}
