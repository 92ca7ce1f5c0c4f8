/// Liveness probe sent by the client, and the literal reply to a bare probe.
pub const PING_TOKEN: &str = "ping";
pub const PONG_TOKEN: &str = "pong";

/// Value of the `type` field in JSON-encoded liveness frames.
pub const PING_TYPE: &str = "ping";
pub const PONG_TYPE: &str = "pong";

/// WebSocket close code for a normal, intentional closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the transport vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code used when the client abandons a channel that stopped answering.
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4000;

/// Close reasons attached to client-initiated closures.
pub const REASON_DISCONNECT: &str = "Client disconnect";
pub const REASON_LOGOUT: &str = "User logout";
pub const REASON_SUPERSEDED: &str = "Superseded by a new channel";
pub const REASON_LIVENESS: &str = "Liveness probe timed out";

/// Default interval between outbound liveness probes, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Reconnect backoff defaults.
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
