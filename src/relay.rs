// src/relay.rs
//! Command relay between clients and the motor controller
//!
//! Each connection gets a [`Session`] with its own rewind flag. A session
//! starts armed when actuation is enabled and is disarmed by an explicit
//! soft disconnect. When an armed session drops, the most recent logged
//! commands are replayed to the controller, newest first, so the rover keeps
//! moving through a short network blip.
//!
//! Failures while logging or writing to the controller are logged and never
//! reach the client. The one exception is a malformed move payload, which is
//! rejected before anything is logged or sent.

use crate::actuator::ActuatorHandle;
use crate::error::Result;
use crate::events::{ClientEvent, MovePayload};
use crate::store::{CommandLog, TelemetryStore};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindState {
    Armed,
    Disarmed,
}

/// Shared view of one session's rewind flag.
///
/// Replay checks it before every command, so disarming takes effect at the
/// next iteration.
#[derive(Debug, Clone)]
pub struct RewindFlag(Arc<AtomicBool>);

impl RewindFlag {
    fn new(armed: bool) -> Self {
        Self(Arc::new(AtomicBool::new(armed)))
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> RewindState {
        if self.is_armed() {
            RewindState::Armed
        } else {
            RewindState::Disarmed
        }
    }
}

pub struct Relay<S> {
    store: Arc<S>,
    /// `None` when actuation is disabled; gates writes and rewind
    actuator: Option<ActuatorHandle>,
    replay_window: usize,
    next_session: AtomicU64,
    /// Replays still running for sessions that already dropped
    replaying: Mutex<Vec<(u64, RewindFlag)>>,
}

impl<S: CommandLog + TelemetryStore> Relay<S> {
    pub fn new(store: Arc<S>, actuator: Option<ActuatorHandle>, replay_window: usize) -> Self {
        Self {
            store,
            actuator,
            replay_window,
            next_session: AtomicU64::new(1),
            replaying: Mutex::new(Vec::new()),
        }
    }

    pub fn motor_enabled(&self) -> bool {
        self.actuator.is_some()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a session for a newly connected client.
    ///
    /// A client that reconnects takes over control, so any replay still
    /// running for a dropped session is disarmed here.
    pub fn connect(self: &Arc<Self>) -> Session<S> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);

        let stale: Vec<(u64, RewindFlag)> = self
            .replaying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (old, flag) in stale {
            flag.disarm();
            info!(session = id, replaying = old, "client connected, stopping replay");
        }

        let rewind = RewindFlag::new(self.motor_enabled());
        info!(session = id, state = ?rewind.state(), "client connected");

        Session {
            id,
            relay: Arc::clone(self),
            rewind,
        }
    }

    /// Send up to `replay_window` logged commands, newest first, while
    /// `flag` stays armed. Returns how many were sent.
    pub async fn replay(&self, actuator: &ActuatorHandle, flag: &RewindFlag) -> usize {
        let commands = match self.store.recent(self.replay_window) {
            Ok(commands) => commands,
            Err(e) => {
                error!(error = %e, "failed to read command log for replay");
                return 0;
            }
        };

        let mut replayed = 0;
        for entry in &commands {
            if !flag.is_armed() {
                info!(replayed, remaining = commands.len() - replayed, "replay disarmed");
                break;
            }
            if let Err(e) = actuator.send(&entry.command).await {
                warn!(error = %e, "replay aborted");
                break;
            }
            replayed += 1;
        }

        replayed
    }

    fn track_replay(&self, session: u64, flag: &RewindFlag) {
        self.replaying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((session, flag.clone()));
    }

    fn untrack_replay(&self, session: u64) {
        self.replaying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != session);
    }
}

/// Per-connection state machine
pub struct Session<S> {
    id: u64,
    relay: Arc<Relay<S>>,
    rewind: RewindFlag,
}

impl<S: CommandLog + TelemetryStore> Session<S> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RewindState {
        self.rewind.state()
    }

    /// Handle on this session's rewind flag, valid after disconnect too
    pub fn rewind_flag(&self) -> RewindFlag {
        self.rewind.clone()
    }

    /// Dispatch one client event. Only malformed moves produce an error.
    pub async fn handle(&self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Move(payload) => self.handle_move(&payload).await,
            ClientEvent::DeployRepeater => {
                self.handle_deploy_repeater().await;
                Ok(())
            }
            ClientEvent::SoftDisconnect => {
                self.soft_disconnect();
                Ok(())
            }
            ClientEvent::Ping => {
                debug!(session = self.id, "ping");
                Ok(())
            }
        }
    }

    /// Intentional disconnect: the drop that follows must not replay
    pub fn soft_disconnect(&self) {
        self.rewind.disarm();
        info!(session = self.id, "soft disconnect");
    }

    /// Log the movement command, then forward it to the controller
    pub async fn handle_move(&self, payload: &MovePayload) -> Result<()> {
        let command = payload.to_command()?;
        info!(session = self.id, command = %command, "movement command received");

        if let Err(e) = self.relay.store.append(&command) {
            error!(session = self.id, command = %command, error = %e, "failed to log command");
        }

        if let Some(actuator) = &self.relay.actuator {
            if let Err(e) = actuator.send(&command).await {
                warn!(session = self.id, command = %command, error = %e, "command not delivered");
            }
        }

        Ok(())
    }

    /// Flag the newest fix as the repeater and tell the controller how many
    /// repeater slots are in use, one-indexed: "00" followed by count + 1.
    pub async fn handle_deploy_repeater(&self) {
        info!(session = self.id, "deploy repeater command received");

        match self.relay.store.latest_fix_id() {
            Ok(Some(id)) => match self.relay.store.designate_repeater(id) {
                Ok(true) => info!(session = self.id, fix = id, "repeater designated"),
                Ok(false) => warn!(session = self.id, fix = id, "fix vanished before flagging"),
                Err(e) => error!(session = self.id, fix = id, error = %e, "failed to flag repeater"),
            },
            Ok(None) => info!(session = self.id, "no GPS fix recorded, nothing to flag"),
            Err(e) => error!(session = self.id, error = %e, "failed to find latest fix"),
        }

        let Some(actuator) = &self.relay.actuator else {
            return;
        };

        match self.relay.store.repeater_count() {
            Ok(count) => {
                let command = format!("00{}", count + 1);
                if let Err(e) = actuator.send(&command).await {
                    warn!(session = self.id, command = %command, error = %e, "command not delivered");
                }
            }
            Err(e) => error!(session = self.id, error = %e, "failed to count repeaters"),
        }
    }

    /// Transport-level drop. Replays recent commands when the session is
    /// still armed and actuation is enabled; returns how many were sent.
    pub async fn disconnect(self) -> usize {
        info!(session = self.id, state = ?self.state(), "client disconnected");

        let Some(actuator) = self.relay.actuator.clone() else {
            return 0;
        };
        if !self.rewind.is_armed() {
            return 0;
        }

        self.relay.track_replay(self.id, &self.rewind);
        let replayed = self.relay.replay(&actuator, &self.rewind).await;
        self.relay.untrack_replay(self.id);

        debug!(session = self.id, replayed, "replay finished");
        replayed
    }
}
