//! Device qualification ("training")
//!
//! A new device first runs a self-registration job, then boots a fixed
//! number of times; it qualifies when enough boot loops passed. A device
//! coming back from retirement gets a single boot loop instead (quick check).
//!
//! The qualifier only keeps score. Jobs are run by the step executor in
//! `training`, which asks for the next task and reports its outcome.

use std::collections::BTreeMap;

use labfleet_api::responses::TrainingStatus;
use labfleet_api::{JobStatus, QualifierState};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::settings::TrainingSettings;

/// Job the qualifier wants run next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingTask {
    Registration,
    BootLoop,
}

/// Whether a step needs to run a job at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    /// Nothing to do right now
    Skip,
    /// The result was decided without running anything
    Finished,
    Run,
}

#[derive(Debug)]
pub struct Qualifier {
    device_id: String,
    settings: TrainingSettings,
    /// Stored state; `RegistrationFailed` is derived from `Enrolling`
    state: QualifierState,
    registered: bool,
    cur_loop: u32,
    statuses: BTreeMap<JobStatus, u32>,
    result: Option<bool>,
    registration_failed_at: Option<Instant>,
}

impl Qualifier {
    pub fn new(device_id: impl Into<String>, settings: TrainingSettings) -> Self {
        Self {
            device_id: device_id.into(),
            settings,
            state: QualifierState::Idle,
            registered: false,
            cur_loop: 0,
            statuses: BTreeMap::new(),
            result: None,
            registration_failed_at: None,
        }
    }

    /// Current state, showing a recent registration failure
    #[must_use]
    pub fn state(&self) -> QualifierState {
        match (self.state, self.registration_failed_at) {
            (QualifierState::Enrolling, Some(failed_at))
                if Instant::now() < failed_at + self.settings.registration_retry_delay =>
            {
                QualifierState::RegistrationFailed
            }
            (state, _) => state,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() != QualifierState::Idle
    }

    /// Outcome of the current run, once decided
    #[must_use]
    pub fn result(&self) -> Option<bool> {
        self.result
    }

    #[must_use]
    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    fn reset(&mut self) {
        self.registered = false;
        self.cur_loop = 0;
        self.statuses.clear();
        self.result = None;
        self.registration_failed_at = None;
    }

    /// Move to `target`
    ///
    /// Going back to IDLE is always allowed and clears all progress. A run
    /// can only start from IDLE.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidTransition` for any other move.
    pub fn set_state(&mut self, target: QualifierState) -> Result<(), CoreError> {
        let current = self.state();
        if current == target {
            return Ok(());
        }

        match target {
            QualifierState::Idle => {
                self.reset();
                self.state = QualifierState::Idle;
            }
            QualifierState::Enrolling | QualifierState::QuickCheck
                if current == QualifierState::Idle =>
            {
                self.state = target;
            }
            QualifierState::RegistrationFailed => {
                self.reset();
                self.registration_failed_at = Some(Instant::now());
                self.state = QualifierState::Enrolling;
            }
            _ => {
                return Err(CoreError::InvalidTransition {
                    from: current,
                    to: target,
                });
            }
        }

        info!(device = %self.device_id, from = %current, to = %self.state(), "qualifier state changed");
        Ok(())
    }

    /// Decide whether the next step must run a job
    pub fn preflight(&mut self) -> Preflight {
        match self.state() {
            QualifierState::Idle | QualifierState::RegistrationFailed => Preflight::Skip,
            _ if self.settings.boot_loop_count < 0 => {
                self.result = Some(true);
                Preflight::Finished
            }
            QualifierState::QuickCheck if !self.settings.quick_check => {
                self.result = Some(true);
                Preflight::Finished
            }
            _ => Preflight::Run,
        }
    }

    /// Claim the next task
    ///
    /// # Errors
    /// Returns `CoreError::Conflict` when the previous boot loop was never
    /// reported, or when no run is in progress.
    pub fn next_task(&mut self) -> Result<TrainingTask, CoreError> {
        match self.state() {
            QualifierState::Enrolling if !self.registered => Ok(TrainingTask::Registration),
            QualifierState::Enrolling => {
                let reported: u32 = self.statuses.values().sum();
                if self.cur_loop != reported {
                    return Err(CoreError::Conflict(format!(
                        "boot loop {} was never reported",
                        self.cur_loop
                    )));
                }
                self.cur_loop += 1;
                Ok(TrainingTask::BootLoop)
            }
            QualifierState::QuickCheck => Ok(TrainingTask::BootLoop),
            state => Err(CoreError::Conflict(format!("no task to run while {state}"))),
        }
    }

    /// Record the outcome of the task handed out last
    ///
    /// # Errors
    /// Returns `CoreError::Conflict` when no run is in progress.
    pub fn report(&mut self, status: JobStatus) -> Result<(), CoreError> {
        match self.state {
            QualifierState::Enrolling if !self.registered => {
                if status == JobStatus::Pass {
                    info!(device = %self.device_id, "registration passed");
                    self.registered = true;
                    if self.settings.boot_loop_count < 1 {
                        self.result = Some(true);
                    }
                } else {
                    warn!(device = %self.device_id, %status, "registration failed");
                    self.set_state(QualifierState::RegistrationFailed)?;
                }
            }
            QualifierState::Enrolling => {
                *self.statuses.entry(status).or_insert(0) += 1;
                info!(
                    device = %self.device_id,
                    loop_count = self.cur_loop,
                    total = self.settings.boot_loop_count,
                    %status,
                    "boot loop finished"
                );

                if i64::from(self.cur_loop) >= i64::from(self.settings.boot_loop_count) {
                    let passed = self.statuses.get(&JobStatus::Pass).copied().unwrap_or(0);
                    self.result = Some(passed >= self.settings.qualifying_rate);
                    info!(
                        device = %self.device_id,
                        passed,
                        needed = self.settings.qualifying_rate,
                        "training complete"
                    );
                }
            }
            QualifierState::QuickCheck => {
                self.result = Some(status == JobStatus::Pass);
                info!(device = %self.device_id, %status, "quick check finished");
            }
            state => {
                return Err(CoreError::Conflict(format!(
                    "nothing to report while {state}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> TrainingStatus {
        TrainingStatus {
            state: self.state(),
            is_active: self.is_active(),
            is_registered: self.registered,
            boot_loop_counts: self.settings.boot_loop_count,
            qualifying_rate: self.settings.qualifying_rate,
            current_loop_count: self.cur_loop,
            statuses: self
                .statuses
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn qualifier(boot_loop_count: i32, qualifying_rate: u32) -> Qualifier {
        let settings = TrainingSettings {
            boot_loop_count,
            qualifying_rate,
            registration_retry_delay: Duration::from_secs(60),
            ..TrainingSettings::default()
        };
        Qualifier::new("dev", settings)
    }

    fn enroll(q: &mut Qualifier) {
        q.set_state(QualifierState::Enrolling).unwrap();
        assert_eq!(q.next_task().unwrap(), TrainingTask::Registration);
        q.report(JobStatus::Pass).unwrap();
    }

    fn run_loops(q: &mut Qualifier, outcomes: &[JobStatus]) {
        for status in outcomes {
            assert_eq!(q.result(), None);
            assert_eq!(q.next_task().unwrap(), TrainingTask::BootLoop);
            q.report(*status).unwrap();
        }
    }

    #[test]
    fn test_enough_passing_loops_qualify() {
        let mut q = qualifier(3, 2);
        enroll(&mut q);
        run_loops(&mut q, &[JobStatus::Pass, JobStatus::Fail, JobStatus::Pass]);
        assert_eq!(q.result(), Some(true));
        assert_eq!(q.status().statuses["PASS"], 2);
    }

    #[test]
    fn test_too_few_passing_loops_fail() {
        let mut q = qualifier(3, 2);
        enroll(&mut q);
        run_loops(&mut q, &[JobStatus::Fail, JobStatus::Fail, JobStatus::Pass]);
        assert_eq!(q.result(), Some(false));
    }

    #[test]
    fn test_zero_loops_qualify_after_registration() {
        let mut q = qualifier(0, 0);
        enroll(&mut q);
        assert_eq!(q.result(), Some(true));
    }

    #[test]
    fn test_negative_loop_count_skips_training() {
        let mut q = qualifier(-1, 0);
        q.set_state(QualifierState::Enrolling).unwrap();
        assert_eq!(q.preflight(), Preflight::Finished);
        assert_eq!(q.result(), Some(true));
    }

    #[test]
    fn test_unreported_loop_blocks_next_task() {
        let mut q = qualifier(3, 2);
        enroll(&mut q);
        q.next_task().unwrap();
        assert!(matches!(q.next_task(), Err(CoreError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_registration_waits_before_retrying() {
        let mut q = qualifier(3, 2);
        q.set_state(QualifierState::Enrolling).unwrap();
        q.next_task().unwrap();
        q.report(JobStatus::Fail).unwrap();

        assert_eq!(q.state(), QualifierState::RegistrationFailed);
        assert_eq!(q.preflight(), Preflight::Skip);
        assert!(q.next_task().is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(q.state(), QualifierState::Enrolling);
        assert_eq!(q.next_task().unwrap(), TrainingTask::Registration);
    }

    #[test]
    fn test_quick_check() {
        let mut q = qualifier(3, 2);
        q.set_state(QualifierState::QuickCheck).unwrap();
        assert_eq!(q.preflight(), Preflight::Run);
        assert_eq!(q.next_task().unwrap(), TrainingTask::BootLoop);
        q.report(JobStatus::Warn).unwrap();
        assert_eq!(q.result(), Some(false));

        let mut disabled = qualifier(3, 2);
        disabled.settings.quick_check = false;
        disabled.set_state(QualifierState::QuickCheck).unwrap();
        assert_eq!(disabled.preflight(), Preflight::Finished);
        assert_eq!(disabled.result(), Some(true));
    }

    #[test]
    fn test_transitions() {
        let mut q = qualifier(3, 2);
        q.set_state(QualifierState::QuickCheck).unwrap();

        let err = q.set_state(QualifierState::Enrolling).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: QualifierState::QuickCheck,
                to: QualifierState::Enrolling
            }
        ));

        q.report(JobStatus::Pass).unwrap();
        q.set_state(QualifierState::Idle).unwrap();
        assert_eq!(q.result(), None);
        assert!(!q.is_active());
        assert!(q.report(JobStatus::Pass).is_err());
    }
}
