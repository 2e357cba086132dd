//! Server configuration
//!
//! Configuration is loaded from environment variables over built-in defaults.

use std::env;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Room configuration
    pub room: RoomConfig,

    /// WebSocket configuration
    pub ws: WsConfig,
}

/// Room-related configuration
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Chat entries retained per room; oldest are evicted first
    pub chat_log_capacity: usize,
    /// Whether the sender of a chat message also receives the broadcast
    pub echo_chat_to_sender: bool,
    /// Maximum chat message length in characters
    pub max_chat_message_len: usize,
    /// Reject chat messages containing blocked words
    pub profanity_filter: bool,
    /// Extra blocked words on top of the built-in list
    pub blocked_words: Vec<String>,
    /// Maximum distinct vote types per room (None = unbounded)
    pub max_vote_types: Option<usize>,
    /// Minimum time between two votes of one user in one room (zero = off)
    pub vote_throttle_window: Duration,
    /// How long an empty room survives before teardown (zero = on last leave)
    pub empty_room_grace: Duration,
    /// Interval of the empty-room sweeper
    pub sweep_interval: Duration,
    /// Chat entries replayed to a joining user
    pub history_on_join: usize,
    /// Per-connection inbound event limits
    pub rate_limit: RateLimitConfig,
}

/// Fixed-window event limits for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Events allowed per `window` (zero = no limiting)
    pub max_events: u32,
    pub window: Duration,
    /// Events allowed per `burst_window`; exceeding it bans the connection
    pub burst_limit: u32,
    pub burst_window: Duration,
    /// How long a banned connection has every event rejected
    pub ban_duration: Duration,
}

/// Configuration for WebSocket connections
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Interval between protocol-level Ping frames
    pub ping_interval: Duration,
    /// Extra silence tolerated after a missed Pong
    pub ping_timeout: Duration,
    pub max_message_size: usize,
    /// Outbound queue depth per connection
    pub outbox_capacity: usize,
}

impl RateLimitConfig {
    /// No limiting at all
    pub fn disabled() -> Self {
        Self {
            max_events: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_events > 0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_events: 20,
            window: Duration::from_secs(1),
            burst_limit: 30,
            burst_window: Duration::from_secs(10),
            ban_duration: Duration::from_secs(300),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            chat_log_capacity: 200,
            echo_chat_to_sender: false,
            max_chat_message_len: 2000,
            profanity_filter: true,
            blocked_words: Vec::new(),
            max_vote_types: None,
            vote_throttle_window: Duration::from_millis(2000),
            empty_room_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            history_on_join: 50,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024, // 64KB
            outbox_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            room: RoomConfig::default(),
            ws: WsConfig::default(),
        }
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from any variable source over the defaults
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Server config
        if let Some(host) = var("HOST") {
            config.host = host;
        }
        if let Some(port) = var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Room config
        if let Some(val) = var("CHAT_LOG_CAPACITY")
            && let Ok(v) = val.parse()
        {
            config.room.chat_log_capacity = v;
        }
        if let Some(val) = var("ECHO_CHAT_TO_SENDER") {
            config.room.echo_chat_to_sender = parse_flag(&val);
        }
        if let Some(val) = var("MAX_CHAT_MESSAGE_LEN")
            && let Ok(v) = val.parse()
        {
            config.room.max_chat_message_len = v;
        }
        if let Some(val) = var("PROFANITY_FILTER") {
            config.room.profanity_filter = parse_flag(&val);
        }
        if let Some(val) = var("CHAT_BLOCKED_WORDS") {
            config.room.blocked_words = val
                .split(',')
                .map(|word| word.trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect();
        }
        if let Some(val) = var("MAX_VOTE_TYPES")
            && let Ok(v) = val.parse::<usize>()
        {
            config.room.max_vote_types = (v > 0).then_some(v);
        }
        if let Some(val) = var("VOTE_THROTTLE_WINDOW_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.room.vote_throttle_window = Duration::from_millis(ms);
        }
        if let Some(val) = var("EMPTY_ROOM_GRACE_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.room.empty_room_grace = Duration::from_secs(secs);
        }
        if let Some(val) = var("ROOM_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.room.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(val) = var("HISTORY_ON_JOIN")
            && let Ok(v) = val.parse()
        {
            config.room.history_on_join = v;
        }

        // Rate limiting
        if let Some(val) = var("RATE_LIMIT_EVENTS_PER_SEC")
            && let Ok(v) = val.parse()
        {
            config.room.rate_limit.max_events = v;
        }
        if let Some(val) = var("RATE_LIMIT_BURST")
            && let Ok(v) = val.parse()
        {
            config.room.rate_limit.burst_limit = v;
        }
        if let Some(val) = var("RATE_LIMIT_BURST_WINDOW_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.room.rate_limit.burst_window = Duration::from_secs(secs);
        }
        if let Some(val) = var("RATE_LIMIT_BAN_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.room.rate_limit.ban_duration = Duration::from_secs(secs);
        }

        // WebSocket config
        if let Some(val) = var("WS_PING_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.ws.ping_interval = Duration::from_secs(secs);
        }
        if let Some(val) = var("WS_PING_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.ws.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = var("WS_MAX_MESSAGE_KB")
            && let Ok(kb) = val.parse::<usize>()
            && kb > 0
        {
            config.ws.max_message_size = kb * 1024;
        }
        if let Some(val) = var("WS_OUTBOX_CAPACITY")
            && let Ok(v) = val.parse::<usize>()
            && v > 0
        {
            config.ws.outbox_capacity = v;
        }

        config
    }
}
