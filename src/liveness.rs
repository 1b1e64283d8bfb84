// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Channel Liveness
//!
//! Per-channel heartbeat state machine detecting silently-dead connections.
//!
//! Two timers: a long heartbeat interval and a short probe timeout. When the
//! heartbeat fires, the channel is sent a ping and has one probe timeout to
//! answer with a pong; no answer retires the channel. Detection latency is
//! bounded by heartbeat interval + probe timeout, and a single delayed pong
//! cannot kill a live channel as long as it lands inside the probe window.
//!
//! The machine is transport-independent: the connection handler owns the
//! actual timers and the WebSocket, and feeds events in. Each transition
//! tells the handler what to do with its timers, so every armed probe
//! deadline has a matching cancel on the pong path and a late timer firing
//! after a state change is a no-op.

/// Liveness states of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// The channel answered its last probe (or was just admitted).
    Alive,
    /// A probe is in flight; the probe deadline is armed.
    ProbeSent,
    /// The channel failed a probe and must be retired.
    Dead,
}

/// What the handler must do after feeding an event in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Nothing; the event was a no-op in the current state.
    None,
    /// Send a ping and arm the probe deadline.
    SendProbe,
    /// Disarm the probe deadline and re-arm the heartbeat interval.
    RearmHeartbeat,
    /// Close the channel, remove it from the registry, announce presence.
    Retire,
}

/// Heartbeat state machine for one channel.
#[derive(Debug)]
pub struct LivenessMonitor {
    state: LivenessState,
}

impl LivenessMonitor {
    /// A channel starts out alive, heartbeat armed.
    pub fn new() -> Self {
        LivenessMonitor {
            state: LivenessState::Alive,
        }
    }

    /// The heartbeat interval fired.
    pub fn on_heartbeat_tick(&mut self) -> LivenessAction {
        match self.state {
            LivenessState::Alive => {
                self.state = LivenessState::ProbeSent;
                LivenessAction::SendProbe
            }
            // A tick while a probe is already in flight (or after death)
            // must not stack a second probe.
            LivenessState::ProbeSent | LivenessState::Dead => LivenessAction::None,
        }
    }

    /// A pong arrived from the channel.
    pub fn on_pong(&mut self) -> LivenessAction {
        match self.state {
            LivenessState::ProbeSent => {
                self.state = LivenessState::Alive;
                LivenessAction::RearmHeartbeat
            }
            // Unsolicited pongs are allowed by the transport; ignore them.
            LivenessState::Alive | LivenessState::Dead => LivenessAction::None,
        }
    }

    /// The probe deadline fired.
    pub fn on_probe_timeout(&mut self) -> LivenessAction {
        match self.state {
            LivenessState::ProbeSent => {
                self.state = LivenessState::Dead;
                LivenessAction::Retire
            }
            // A timeout that lost the race against a pong is a no-op.
            LivenessState::Alive | LivenessState::Dead => LivenessAction::None,
        }
    }

    /// Current state.
    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Whether the channel has been declared dead.
    pub fn is_dead(&self) -> bool {
        self.state == LivenessState::Dead
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}
