use std::sync::{Arc, Mutex};

/// Shared progress handle for batch backtests, cheap to clone across the
/// runner and any host that wants to poll it.
#[derive(Clone, Default)]
pub struct BacktestStatus {
    inner: Arc<Mutex<BacktestStatusData>>,
}

#[derive(Default)]
struct BacktestStatusData {
    phase: String,
    total_runs: usize,
    completed_runs: usize,
    failed_runs: usize,
    last_sharpe: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct BacktestStatusSnapshot {
    pub phase: String,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub last_sharpe: Option<f64>,
}

impl BacktestStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BacktestStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_runs: usize,
        completed_runs: usize,
        failed_runs: usize,
        last_sharpe: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_runs = total_runs;
            data.completed_runs = completed_runs;
            data.failed_runs = failed_runs;
            data.last_sharpe = last_sharpe;
        }
    }

    pub fn snapshot(&self) -> BacktestStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            BacktestStatusSnapshot {
                phase: data.phase.clone(),
                total_runs: data.total_runs,
                completed_runs: data.completed_runs,
                failed_runs: data.failed_runs,
                last_sharpe: data.last_sharpe,
            }
        } else {
            BacktestStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_runs: 0,
                completed_runs: 0,
                failed_runs: 0,
                last_sharpe: None,
            }
        }
    }
}
