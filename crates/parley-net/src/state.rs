//! Channel lifecycle state machine.
//!
//! [`ConnectionMachine`] is a plain value: every input returns the list of
//! [`Effect`]s the driver must perform, and nothing here touches a socket or
//! a timer. The transition table can therefore be tested exhaustively
//! without a runtime.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Open ──disconnect──▶ Closing ──closed──▶ Idle
//!                     │   ▲                  │
//!          error/close│   │timer / retry_now │abnormal close, liveness timeout
//!                     ▼   │                  ▼
//!              ReconnectScheduled ◀──────────┘
//!                     │ attempts exhausted
//!                     ▼
//!                 Abandoned
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_shared::constants::{
    CLOSE_ABNORMAL, CLOSE_LIVENESS_TIMEOUT, CLOSE_NORMAL, REASON_DISCONNECT, REASON_LIVENESS,
    REASON_LOGOUT, REASON_SUPERSEDED,
};
use parley_shared::UserId;

use crate::backoff::Backoff;
use crate::error::{NetError, Result};
use crate::events::ConnectionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    ReconnectScheduled { attempt: u32, not_before: Instant },
    Abandoned,
}

/// Coarse connectivity shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn connectivity(&self) -> Connectivity {
        match self {
            Self::Open => Connectivity::Connected,
            Self::Connecting | Self::ReconnectScheduled { .. } => Connectivity::Reconnecting,
            Self::Idle | Self::Closing | Self::Abandoned => Connectivity::Disconnected,
        }
    }
}

/// Side effects requested by a transition, executed in order by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a connect attempt for `user_id`.
    OpenChannel { user_id: UserId },
    /// Ask the live channel to close and keep listening until it reports closed.
    CloseChannel { code: u16, reason: String },
    /// Close the live channel (or abort the pending attempt) and stop listening to it.
    DropChannel { code: u16, reason: String },
    ArmTimer { delay: Duration },
    CancelTimer,
    StartHeartbeat,
    StopHeartbeat,
    Emit(ConnectionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseIntent {
    Disconnect,
    Logout,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: Backoff,
    attempts: u32,
    user_id: Option<UserId>,
    intent: Option<CloseIntent>,
    logged_out: bool,
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff,
            attempts: 0,
            user_id: None,
            intent: None,
            logged_out: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out
    }

    /// Establish a channel scoped to `user_id`, replacing any prior one.
    pub fn connect(&mut self, user_id: UserId) -> Result<Vec<Effect>> {
        if self.logged_out {
            return Err(self.not_allowed("connect"));
        }
        let same_user = self.user_id.as_ref() == Some(&user_id);
        if same_user && matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            debug!(user = %user_id, "Channel already being established for user");
            return Ok(Vec::new());
        }

        let mut effects = self.release_channel(REASON_SUPERSEDED);
        info!(user = %user_id, "Opening push channel");
        self.user_id = Some(user_id.clone());
        self.attempts = 0;
        self.intent = None;
        self.state = ConnectionState::Connecting;
        effects.push(Effect::OpenChannel { user_id });
        Ok(effects)
    }

    /// Transport handshake completed.
    pub fn opened(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "Ignoring stale channel open");
            return Vec::new();
        }
        self.attempts = 0;
        self.state = ConnectionState::Open;
        vec![Effect::StartHeartbeat, Effect::Emit(ConnectionEvent::Opened)]
    }

    /// The transport reported a close, with or without our asking.
    pub fn closed(&mut self, code: u16, reason: String, now: Instant) -> Vec<Effect> {
        let event = Effect::Emit(ConnectionEvent::Closed {
            code,
            reason: reason.clone(),
        });
        match self.state {
            ConnectionState::Closing => {
                self.finish_intentional_close();
                vec![event]
            }
            ConnectionState::Open if code == CLOSE_NORMAL => {
                info!(code, reason = %reason, "Channel closed normally by remote");
                self.state = ConnectionState::Idle;
                vec![Effect::StopHeartbeat, event]
            }
            ConnectionState::Open => {
                warn!(code, reason = %reason, "Channel closed abnormally");
                let mut effects = vec![Effect::StopHeartbeat, event];
                effects.extend(self.schedule_reconnect(now));
                effects
            }
            ConnectionState::Connecting => {
                warn!(code, reason = %reason, "Channel closed before opening");
                let mut effects = vec![event];
                effects.extend(self.schedule_reconnect(now));
                effects
            }
            _ => Vec::new(),
        }
    }

    /// The transport failed. Before open this is a failed attempt; after open
    /// it is treated like an abnormal close.
    pub fn failed(&mut self, error: String, now: Instant) -> Vec<Effect> {
        let event = Effect::Emit(ConnectionEvent::Error(error.clone()));
        match self.state {
            ConnectionState::Connecting => {
                warn!(error = %error, attempt = self.attempts, "Connect attempt failed");
                let mut effects = vec![event];
                effects.extend(self.schedule_reconnect(now));
                effects
            }
            ConnectionState::Open => {
                warn!(error = %error, "Channel failed");
                let mut effects = vec![
                    Effect::StopHeartbeat,
                    Effect::DropChannel {
                        code: CLOSE_ABNORMAL,
                        reason: error,
                    },
                    event,
                ];
                effects.extend(self.schedule_reconnect(now));
                effects
            }
            ConnectionState::Closing => {
                self.finish_intentional_close();
                vec![
                    Effect::DropChannel {
                        code: CLOSE_NORMAL,
                        reason: error,
                    },
                    event,
                ]
            }
            _ => Vec::new(),
        }
    }

    /// The reconnect timer elapsed.
    pub fn timer_fired(&mut self) -> Vec<Effect> {
        if !matches!(self.state, ConnectionState::ReconnectScheduled { .. }) {
            return Vec::new();
        }
        match self.user_id.clone() {
            Some(user_id) => {
                info!(user = %user_id, attempt = self.attempts, "Reconnecting push channel");
                self.state = ConnectionState::Connecting;
                vec![Effect::OpenChannel { user_id }]
            }
            None => {
                self.state = ConnectionState::Idle;
                Vec::new()
            }
        }
    }

    /// Intentional close; no automatic reconnect follows.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                self.intent = Some(CloseIntent::Disconnect);
                vec![
                    Effect::StopHeartbeat,
                    Effect::CloseChannel {
                        code: CLOSE_NORMAL,
                        reason: REASON_DISCONNECT.to_string(),
                    },
                ]
            }
            ConnectionState::Connecting | ConnectionState::ReconnectScheduled { .. } => {
                let effects = self.release_channel(REASON_DISCONNECT);
                self.state = ConnectionState::Idle;
                effects
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Abandoned => {
                Vec::new()
            }
        }
    }

    /// Close for good: the session ends in `Abandoned` and refuses to reconnect.
    pub fn logout(&mut self) -> Vec<Effect> {
        self.logged_out = true;
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                self.intent = Some(CloseIntent::Logout);
                vec![
                    Effect::StopHeartbeat,
                    Effect::CloseChannel {
                        code: CLOSE_NORMAL,
                        reason: REASON_LOGOUT.to_string(),
                    },
                ]
            }
            ConnectionState::Closing => {
                self.intent = Some(CloseIntent::Logout);
                Vec::new()
            }
            _ => {
                let effects = self.release_channel(REASON_LOGOUT);
                self.state = ConnectionState::Abandoned;
                effects
            }
        }
    }

    /// Manual override, accepted only while waiting to reconnect or after
    /// giving up.
    pub fn retry_now(&mut self) -> Result<Vec<Effect>> {
        if self.logged_out {
            return Err(self.not_allowed("retry_now"));
        }
        let user_id = match (&self.state, &self.user_id) {
            (
                ConnectionState::Abandoned | ConnectionState::ReconnectScheduled { .. },
                Some(user_id),
            ) => user_id.clone(),
            _ => return Err(self.not_allowed("retry_now")),
        };

        let mut effects = Vec::new();
        if matches!(self.state, ConnectionState::ReconnectScheduled { .. }) {
            effects.push(Effect::CancelTimer);
        }
        info!(user = %user_id, "Manual reconnect requested");
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
        effects.push(Effect::OpenChannel { user_id });
        Ok(effects)
    }

    /// Nothing was heard from the remote within the liveness tolerance.
    pub fn liveness_expired(&mut self, now: Instant) -> Vec<Effect> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        warn!("Remote stopped answering liveness probes");
        let mut effects = vec![
            Effect::StopHeartbeat,
            Effect::DropChannel {
                code: CLOSE_LIVENESS_TIMEOUT,
                reason: REASON_LIVENESS.to_string(),
            },
            Effect::Emit(ConnectionEvent::Error(REASON_LIVENESS.to_string())),
        ];
        effects.extend(self.schedule_reconnect(now));
        effects
    }

    fn schedule_reconnect(&mut self, now: Instant) -> Vec<Effect> {
        if !self.backoff.allows(self.attempts) {
            warn!(attempts = self.attempts, "Reconnect attempts exhausted, giving up");
            self.state = ConnectionState::Abandoned;
            return Vec::new();
        }
        let delay = self.backoff.delay(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::ReconnectScheduled {
            attempt: self.attempts,
            not_before: now + delay,
        };
        info!(
            attempt = self.attempts,
            max = self.backoff.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        vec![Effect::ArmTimer { delay }]
    }

    /// Effects that get rid of whatever channel, attempt or timer the
    /// current state owns.
    fn release_channel(&self, reason: &str) -> Vec<Effect> {
        let drop = Effect::DropChannel {
            code: CLOSE_NORMAL,
            reason: reason.to_string(),
        };
        match self.state {
            ConnectionState::Open => vec![Effect::StopHeartbeat, drop],
            ConnectionState::Connecting | ConnectionState::Closing => vec![drop],
            ConnectionState::ReconnectScheduled { .. } => vec![Effect::CancelTimer],
            ConnectionState::Idle | ConnectionState::Abandoned => Vec::new(),
        }
    }

    fn finish_intentional_close(&mut self) {
        self.state = match self.intent.take() {
            Some(CloseIntent::Logout) => ConnectionState::Abandoned,
            _ if self.logged_out => ConnectionState::Abandoned,
            _ => ConnectionState::Idle,
        };
        debug!(state = ?self.state, "Intentional close completed");
    }

    fn not_allowed(&self, operation: &'static str) -> NetError {
        NetError::NotAllowed {
            operation,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            5,
        ))
    }

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    fn open(m: &mut ConnectionMachine) {
        m.connect(user("1")).unwrap();
        m.opened();
        assert_eq!(m.state(), ConnectionState::Open);
    }

    fn armed_delay(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ArmTimer { delay } => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn test_connect_from_idle() {
        let mut m = machine();
        let effects = m.connect(user("1")).unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(effects, vec![Effect::OpenChannel { user_id: user("1") }]);
    }

    #[test]
    fn test_open_starts_heartbeat_and_resets_attempts() {
        let mut m = machine();
        m.connect(user("1")).unwrap();
        m.failed("refused".into(), Instant::now());
        m.timer_fired();
        assert_eq!(m.attempts(), 1);

        let effects = m.opened();
        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(m.attempts(), 0);
        assert_eq!(
            effects,
            vec![Effect::StartHeartbeat, Effect::Emit(ConnectionEvent::Opened)]
        );
    }

    #[test]
    fn test_abnormal_close_schedules_reconnect_with_growing_delay() {
        let mut m = machine();
        open(&mut m);
        let now = Instant::now();

        let effects = m.closed(1006, "gone".into(), now);
        assert!(effects.contains(&Effect::StopHeartbeat));
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(1)));
        assert_eq!(
            m.state(),
            ConnectionState::ReconnectScheduled {
                attempt: 1,
                not_before: now + Duration::from_secs(1)
            }
        );

        let mut delays = Vec::new();
        for _ in 0..4 {
            m.timer_fired();
            assert_eq!(m.state(), ConnectionState::Connecting);
            delays.push(armed_delay(&m.failed("refused".into(), now)).unwrap().as_secs());
        }
        assert_eq!(delays, vec![2, 4, 8, 16]);
    }

    #[test]
    fn test_close_after_two_attempts_waits_base_times_four() {
        let mut m = machine();
        m.connect(user("1")).unwrap();
        let now = Instant::now();
        m.failed("refused".into(), now);
        m.timer_fired();
        m.failed("refused".into(), now);
        m.timer_fired();
        assert_eq!(m.attempts(), 2);

        let effects = m.closed(1011, "server error".into(), now);
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_ceiling_reaches_abandoned() {
        let mut m = machine();
        m.connect(user("1")).unwrap();
        let now = Instant::now();
        for _ in 0..5 {
            m.failed("refused".into(), now);
            assert!(matches!(m.state(), ConnectionState::ReconnectScheduled { .. }));
            m.timer_fired();
        }
        let effects = m.failed("refused".into(), now);
        assert_eq!(m.state(), ConnectionState::Abandoned);
        assert_eq!(armed_delay(&effects), None);
    }

    #[test]
    fn test_normal_remote_close_does_not_reconnect() {
        let mut m = machine();
        open(&mut m);
        let effects = m.closed(CLOSE_NORMAL, "bye".into(), Instant::now());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(armed_delay(&effects), None);
    }

    #[test]
    fn test_disconnect_goes_through_closing_to_idle() {
        let mut m = machine();
        open(&mut m);
        let effects = m.disconnect();
        assert_eq!(m.state(), ConnectionState::Closing);
        assert!(effects.contains(&Effect::CloseChannel {
            code: CLOSE_NORMAL,
            reason: REASON_DISCONNECT.to_string()
        }));

        let effects = m.closed(CLOSE_NORMAL, REASON_DISCONNECT.into(), Instant::now());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(armed_delay(&effects), None);
    }

    #[test]
    fn test_disconnect_during_intentional_close_with_abnormal_code_still_idles() {
        let mut m = machine();
        open(&mut m);
        m.disconnect();
        let effects = m.closed(1006, String::new(), Instant::now());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(armed_delay(&effects), None);
    }

    #[test]
    fn test_disconnect_cancels_pending_timer() {
        let mut m = machine();
        open(&mut m);
        m.closed(1006, String::new(), Instant::now());
        let effects = m.disconnect();
        assert_eq!(effects, vec![Effect::CancelTimer]);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.timer_fired().is_empty());
    }

    #[test]
    fn test_connect_with_other_user_replaces_channel() {
        let mut m = machine();
        open(&mut m);
        let effects = m.connect(user("2")).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::StopHeartbeat,
                Effect::DropChannel {
                    code: CLOSE_NORMAL,
                    reason: REASON_SUPERSEDED.to_string()
                },
                Effect::OpenChannel { user_id: user("2") },
            ]
        );
        assert_eq!(m.user_id(), Some(&user("2")));
    }

    #[test]
    fn test_connect_same_user_while_open_is_noop() {
        let mut m = machine();
        open(&mut m);
        assert!(m.connect(user("1")).unwrap().is_empty());
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_retry_now_only_when_waiting_or_abandoned() {
        let mut m = machine();
        assert!(m.retry_now().is_err());
        open(&mut m);
        assert!(m.retry_now().is_err());

        m.closed(1006, String::new(), Instant::now());
        m.timer_fired();
        m.failed("refused".into(), Instant::now());
        assert_eq!(m.attempts(), 2);

        let effects = m.retry_now().unwrap();
        assert_eq!(
            effects,
            vec![Effect::CancelTimer, Effect::OpenChannel { user_id: user("1") }]
        );
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_retry_now_from_abandoned() {
        let mut m = ConnectionMachine::new(Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            0,
        ));
        m.connect(user("1")).unwrap();
        m.failed("refused".into(), Instant::now());
        assert_eq!(m.state(), ConnectionState::Abandoned);

        let effects = m.retry_now().unwrap();
        assert_eq!(effects, vec![Effect::OpenChannel { user_id: user("1") }]);
    }

    #[test]
    fn test_logout_is_terminal() {
        let mut m = machine();
        open(&mut m);
        m.logout();
        assert_eq!(m.state(), ConnectionState::Closing);
        m.closed(CLOSE_NORMAL, REASON_LOGOUT.into(), Instant::now());
        assert_eq!(m.state(), ConnectionState::Abandoned);
        assert!(m.retry_now().is_err());
        assert!(m.connect(user("1")).is_err());
    }

    #[test]
    fn test_liveness_expiry_drops_channel_and_backs_off() {
        let mut m = machine();
        open(&mut m);
        let effects = m.liveness_expired(Instant::now());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::DropChannel {
                code: CLOSE_LIVENESS_TIMEOUT,
                ..
            }
        )));
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_stale_inputs_are_ignored() {
        let mut m = machine();
        assert!(m.opened().is_empty());
        assert!(m.closed(1006, String::new(), Instant::now()).is_empty());
        assert!(m.timer_fired().is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_connectivity_mapping() {
        let mut m = machine();
        assert_eq!(m.state().connectivity(), Connectivity::Disconnected);
        m.connect(user("1")).unwrap();
        assert_eq!(m.state().connectivity(), Connectivity::Reconnecting);
        m.opened();
        assert_eq!(m.state().connectivity(), Connectivity::Connected);
    }
}
