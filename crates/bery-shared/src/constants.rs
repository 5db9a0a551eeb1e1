/// Reserved identity that is always serviced by the canned-reply assistant.
pub const ASSISTANT_ID: &str = "bery-ai";

/// Display name attached to assistant replies.
pub const ASSISTANT_NAME: &str = "Bery AI";

/// Contact ids with this prefix address a group conversation.
pub const GROUP_PREFIX: &str = "group-";

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// WebSocket endpoint path
pub const WS_PATH: &str = "/ws";

/// Delay before the "delivered" tick is sent back to the sender (ms)
pub const DELIVERED_DELAY_MS: u64 = 300;

/// Delay before the "read" tick is sent back to the sender (ms)
pub const READ_DELAY_MS: u64 = 1000;

/// Simulated assistant "typing" time before a reply is sent (ms)
pub const ASSISTANT_DELAY_MS: u64 = 1500;

/// Outbound envelopes buffered per connection before new ones are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Client reconnect backoff: base delay, cap and attempt limit
pub const RECONNECT_BASE_MS: u64 = 1000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
