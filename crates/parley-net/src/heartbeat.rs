//! Liveness probing over an open channel.
//!
//! A monitor exists only while the channel is `Open`. The manager creates a
//! fresh one on every open and drops it on every exit from `Open`, so a
//! stale interval can never outlive the channel it was probing.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use parley_shared::constants::PING_TOKEN;
use parley_shared::protocol::pong_for;
use parley_shared::{InboundFrame, Liveness};

/// What the manager should do after a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a liveness probe.
    Probe,
    /// Nothing arrived within the liveness timeout; the peer is presumed dead.
    Expired,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    ticker: Interval,
    liveness_timeout: Option<Duration>,
    last_inbound: Instant,
}

impl HeartbeatMonitor {
    /// Start probing every `period`, the first probe one period from now.
    pub fn start(period: Duration, liveness_timeout: Option<Duration>) -> Self {
        let period = period.max(Duration::from_millis(1));
        let now = Instant::now();
        let mut ticker = interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            liveness_timeout,
            last_inbound: now,
        }
    }

    /// The probe payload.
    pub fn probe() -> &'static str {
        PING_TOKEN
    }

    /// Wait for the next tick.
    ///
    /// Expiry is only checked on ticks, so it is detected with up to one
    /// period of delay.
    pub async fn tick(&mut self) -> HeartbeatTick {
        self.ticker.tick().await;
        match self.liveness_timeout {
            Some(limit) if self.last_inbound.elapsed() >= limit => HeartbeatTick::Expired,
            _ => HeartbeatTick::Probe,
        }
    }

    /// Any inbound traffic counts as a sign of life.
    pub fn observe_inbound(&mut self) {
        self.last_inbound = Instant::now();
    }

    /// The immediate reply owed to a remote probe, if `frame` is one.
    pub fn reply_to(&self, frame: &InboundFrame) -> Option<String> {
        match frame {
            InboundFrame::Heartbeat(Liveness::Ping, form) => Some(pong_for(*form, Utc::now())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_after_one_period() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::start(Duration::from_secs(30), None);
        assert_eq!(monitor.tick().await, HeartbeatTick::Probe);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(monitor.tick().await, HeartbeatTick::Probe);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_inbound_traffic() {
        let mut monitor =
            HeartbeatMonitor::start(Duration::from_secs(10), Some(Duration::from_secs(25)));
        assert_eq!(monitor.tick().await, HeartbeatTick::Probe);
        assert_eq!(monitor.tick().await, HeartbeatTick::Probe);
        assert_eq!(monitor.tick().await, HeartbeatTick::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_traffic_keeps_channel_alive() {
        let mut monitor =
            HeartbeatMonitor::start(Duration::from_secs(10), Some(Duration::from_secs(15)));
        for _ in 0..5 {
            assert_eq!(monitor.tick().await, HeartbeatTick::Probe);
            monitor.observe_inbound();
        }
    }

    #[tokio::test]
    async fn test_replies_only_to_pings() {
        let monitor = HeartbeatMonitor::start(Duration::from_secs(30), None);
        assert_eq!(
            monitor.reply_to(&InboundFrame::decode("ping")).as_deref(),
            Some("pong")
        );
        let reply = monitor
            .reply_to(&InboundFrame::decode(r#"{"type":"ping"}"#))
            .unwrap();
        assert!(reply.contains("\"type\":\"pong\""));
        assert!(monitor.reply_to(&InboundFrame::decode("pong")).is_none());
        assert!(monitor
            .reply_to(&InboundFrame::decode(r#"{"chat_id":1,"sender_id":2,"content":"x"}"#))
            .is_none());
    }
}
