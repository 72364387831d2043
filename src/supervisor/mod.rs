//! Forward-progress timers for one session: a short "did it load" deadline, a
//! long "did it finish" deadline, and the grace period before a manual override
//! is offered.

pub mod timer;

pub use timer::DeadlineTimer;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Deadline {
    Load,
    Completion,
    OverrideGrace,
}

impl Deadline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Deadline::Load => "load",
            Deadline::Completion => "completion",
            Deadline::OverrideGrace => "override-grace",
        }
    }
}

#[derive(Default)]
pub struct Supervisor {
    timers: HashMap<Deadline, DeadlineTimer>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `deadline`, replacing (and cancelling) any timer already armed for it.
    pub fn arm<F, Fut>(&mut self, deadline: Deadline, after: Duration, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        log_debug!("arming {} deadline for {:?}", deadline.as_str(), after);
        let timer = DeadlineTimer::spawn(after, on_expire);
        if let Some(previous) = self.timers.insert(deadline, timer) {
            previous.cancel();
        }
    }

    pub fn cancel(&mut self, deadline: Deadline) {
        if let Some(timer) = self.timers.remove(&deadline) {
            log_debug!("cancelling {} deadline", deadline.as_str());
            timer.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (deadline, timer) in self.timers.drain() {
            log_debug!("cancelling {} deadline", deadline.as_str());
            timer.cancel();
        }
    }

    /// True while `deadline` is armed and has not fired yet.
    pub fn is_armed(&self, deadline: Deadline) -> bool {
        self.timers
            .get(&deadline)
            .map(|timer| !timer.is_finished())
            .unwrap_or(false)
    }
}
