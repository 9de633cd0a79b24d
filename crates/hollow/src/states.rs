//! The application state machine and the fixed-tick process loop.
//!
//! States stack; transitions are commands queued on a [`StateControl`]
//! and committed at the tick boundary, never mid-update. The process
//! drives the top of the stack at 16 ms per tick and sleeps out the
//! remainder of each cycle.

use std::time::{Duration, Instant};

use hollow_shared::constants::TICK_MS;

/// One application state.
pub trait State {
    /// The state became the top of the stack.
    fn on_enter(&mut self) {}
    /// The state stopped being the top of the stack.
    fn on_exit(&mut self) {}
    /// One fixed tick.
    fn update(&mut self, ctl: &mut StateControl, dt: i32);
    /// The process wants to end; default is to unwind the whole stack.
    ///
    /// States owning unsaved data switch to an unload state here.
    fn handle_quit(&mut self, ctl: &mut StateControl) {
        ctl.pop_all();
    }
}

/// A queued transition.
enum StateCommand {
    Push(Box<dyn State>),
    Switch(Box<dyn State>),
    Pop,
    PopAll,
}

/// Transition queue handed to states during update.
#[derive(Default)]
pub struct StateControl {
    queue: Vec<StateCommand>,
}

impl StateControl {
    /// Puts a state on top of the current one.
    pub fn push(&mut self, state: Box<dyn State>) {
        self.queue.push(StateCommand::Push(state));
    }

    /// Replaces the top state.
    pub fn switch(&mut self, state: Box<dyn State>) {
        self.queue.push(StateCommand::Switch(state));
    }

    /// Removes the top state.
    pub fn pop(&mut self) {
        self.queue.push(StateCommand::Pop);
    }

    /// Unwinds the whole stack, ending the process loop.
    pub fn pop_all(&mut self) {
        self.queue.push(StateCommand::PopAll);
    }

    fn commit(&mut self, stack: &mut Vec<Box<dyn State>>) {
        for command in self.queue.drain(..) {
            match command {
                StateCommand::Push(mut state) => {
                    if let Some(top) = stack.last_mut() {
                        top.on_exit();
                    }
                    state.on_enter();
                    stack.push(state);
                }
                StateCommand::Switch(mut state) => {
                    if let Some(mut old) = stack.pop() {
                        old.on_exit();
                    }
                    state.on_enter();
                    stack.push(state);
                }
                StateCommand::Pop => {
                    if let Some(mut old) = stack.pop() {
                        old.on_exit();
                    }
                    if let Some(top) = stack.last_mut() {
                        top.on_enter();
                    }
                }
                StateCommand::PopAll => {
                    while let Some(mut old) = stack.pop() {
                        old.on_exit();
                    }
                }
            }
        }
    }
}

/// Limits after which the process asks its states to quit.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunLimits {
    /// Stop after this many ticks.
    pub frame_limit: Option<u64>,
    /// Stop after this much wall-clock time in milliseconds.
    pub time_limit: Option<i64>,
}

/// The fixed-tick main loop.
pub struct Process {
    stack: Vec<Box<dyn State>>,
    ctl: StateControl,
}

impl Process {
    /// Process starting in the given state.
    #[must_use]
    pub fn new(mut initial: Box<dyn State>) -> Self {
        initial.on_enter();
        Self {
            stack: vec![initial],
            ctl: StateControl::default(),
        }
    }

    /// Runs until the stack empties, honoring the limits.
    ///
    /// Each cycle runs exactly one fixed tick, commits transitions and
    /// sleeps out the remainder of the 16 ms budget.
    pub fn run(&mut self, limits: RunLimits) {
        let started = Instant::now();
        let mut ticks: u64 = 0;
        let mut quit_sent = false;

        while let Some(top) = self.stack.last_mut() {
            let tick_started = Instant::now();

            let over_frames = limits.frame_limit.is_some_and(|n| ticks >= n);
            let over_time = limits
                .time_limit
                .is_some_and(|ms| started.elapsed().as_millis() as i64 >= ms);
            if (over_frames || over_time) && !quit_sent {
                top.handle_quit(&mut self.ctl);
                quit_sent = true;
                self.ctl.commit(&mut self.stack);
                continue;
            }

            top.update(&mut self.ctl, TICK_MS);
            ticks += 1;
            self.ctl.commit(&mut self.stack);

            if self.stack.is_empty() {
                break;
            }
            let spent = tick_started.elapsed();
            let budget = Duration::from_millis(TICK_MS as u64);
            if spent < budget {
                std::thread::sleep(budget - spent);
            }
        }
    }

    /// Runs a single tick without pacing; for tests and embedding.
    pub fn step(&mut self) -> bool {
        if let Some(top) = self.stack.last_mut() {
            top.update(&mut self.ctl, TICK_MS);
            self.ctl.commit(&mut self.stack);
        }
        !self.stack.is_empty()
    }
}
