//! A single heist being planned or executed in one community.
//!
//! Crew membership and phase share one mutex so a join and the transition to
//! execution can never interleave. The termination flag has its own mutex and
//! condvar; the waiting worker sleeps on it so a reset wakes it immediately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{HeistError, Result};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Executing,
    Completed,
}

/// Identifies a session in notifications. Ids are unique per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionHandle {
    pub community_id: String,
    pub session_id: u64,
}

#[derive(Debug)]
struct CrewState {
    crew: Vec<String>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    DeadlineReached,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub handle: SessionHandle,
    pub initiator_id: String,
    pub crew: Vec<String>,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    initiator_id: String,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    state: Mutex<CrewState>,
    terminated: Mutex<bool>,
    wake: Condvar,
}

impl Session {
    /// Creates a session in `Planning` with the initiator as its first member.
    pub fn new(
        handle: SessionHandle,
        initiator_id: impl Into<String>,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let initiator_id = initiator_id.into();
        Self {
            handle,
            started_at,
            deadline,
            state: Mutex::new(CrewState {
                crew: vec![initiator_id.clone()],
                phase: Phase::Planning,
            }),
            initiator_id,
            terminated: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn community_id(&self) -> &str {
        &self.handle.community_id
    }

    pub fn initiator_id(&self) -> &str {
        &self.initiator_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn crew(&self) -> Vec<String> {
        lock(&self.state).crew.clone()
    }

    pub fn is_member(&self, member_id: &str) -> bool {
        lock(&self.state).crew.iter().any(|id| id == member_id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.state);
        SessionSnapshot {
            handle: self.handle.clone(),
            initiator_id: self.initiator_id.clone(),
            crew: state.crew.clone(),
            phase: state.phase,
            started_at: self.started_at,
            deadline: self.deadline,
        }
    }

    /// Appends a member while the crew is still being assembled.
    /// Returns the crew size after the join.
    pub fn join(&self, member_id: &str) -> Result<usize> {
        let mut state = lock(&self.state);
        if state.phase != Phase::Planning || self.is_terminated() {
            return Err(HeistError::EventAlreadyStarted);
        }
        if state.crew.iter().any(|id| id == member_id) {
            return Err(HeistError::AlreadyMember);
        }
        state.crew.push(member_id.to_string());
        Ok(state.crew.len())
    }

    /// Backs out a join whose payment could not be collected.
    pub fn leave(&self, member_id: &str) -> bool {
        let mut state = lock(&self.state);
        if state.phase != Phase::Planning || member_id == self.initiator_id {
            return false;
        }
        let before = state.crew.len();
        state.crew.retain(|id| id != member_id);
        state.crew.len() != before
    }

    /// Freezes the crew. Only the first caller gets the snapshot.
    pub fn begin_execution(&self) -> Result<Vec<String>> {
        let mut state = lock(&self.state);
        if state.phase != Phase::Planning {
            return Err(HeistError::EventAlreadyStarted);
        }
        state.phase = Phase::Executing;
        Ok(state.crew.clone())
    }

    pub fn complete(&self) {
        let mut state = lock(&self.state);
        if state.phase == Phase::Executing {
            state.phase = Phase::Completed;
        }
    }

    /// Sets the termination flag and wakes the worker. Returns false if the
    /// session was already terminated.
    pub fn terminate(&self) -> bool {
        let mut terminated = lock(&self.terminated);
        if *terminated {
            return false;
        }
        *terminated = true;
        self.wake.notify_all();
        true
    }

    pub fn is_terminated(&self) -> bool {
        *lock(&self.terminated)
    }

    /// Blocks until the planning deadline or termination, calling `on_tick`
    /// after every wake-up that did neither. Sleeps at most `poll` at a time.
    pub fn wait_for_deadline<F>(&self, poll: Duration, mut on_tick: F) -> WaitOutcome
    where
        F: FnMut(&Session),
    {
        loop {
            let remaining = match (self.deadline - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    if self.is_terminated() {
                        return WaitOutcome::Terminated;
                    }
                    return WaitOutcome::DeadlineReached;
                }
            };
            let step = remaining.min(poll);

            let terminated = lock(&self.terminated);
            let (terminated, _) = self
                .wake
                .wait_timeout_while(terminated, step, |flag| !*flag)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *terminated {
                return WaitOutcome::Terminated;
            }
            drop(terminated);

            if Utc::now() >= self.deadline {
                return WaitOutcome::DeadlineReached;
            }
            on_tick(self);
        }
    }
}
