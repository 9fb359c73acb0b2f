use std::time::Duration;

use bitflags::bitflags;

// Shared record state flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u32 {
        /// Engine banner has been drained, channels are usable
        const LAUNCHED = 0x01;
        /// Last client is tearing the engine down
        const TEARING_DOWN = 0x02;
    }
}

// Handle exchange record states
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExchangeFlags: u32 {
        const REQUESTED = 0x01;
        const HANDLES_SENT = 0x02;
        const FAILED = 0x04;
    }
}

/// Magic number identifying an initialized session record
pub const SESSION_MAGIC: u32 = 0x7A91_DE50;
/// Layout version of the session record
pub const SESSION_VERSION: u32 = 1;
/// Maximum number of clients tracked in the shared registry
pub const MAX_CLIENTS: usize = 64;

/// Prefix of every OS-level shared object name
pub const OBJECT_PREFIX: &str = "tapibridge";
pub const SEGMENT_SUFFIX: &str = "shm";
pub const SESSION_LOCK_SUFFIX: &str = "lock";
pub const QUERY_LOCK_SUFFIX: &str = "qlock";
pub const INPUT_CHANNEL_SUFFIX: &str = "in";
pub const OUTPUT_CHANNEL_SUFFIX: &str = "out";

// Timeouts
pub const DEFAULT_SESSION_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUERY_LOCK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_READ_IDLE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_LONG_READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ENGINE_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between polls of a lock, channel path or event
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound of the channel-open backoff
pub const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Bytes requested per read from the output channel
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
/// Practical upper bound for one statement written to the input channel
pub const DEFAULT_MAX_STATEMENT_BYTES: usize = 8192;

// Engine command syntax
pub const TAPI_PREFIX: &str = "/tapi";
pub const QUIT_COMMAND: &str = "/q";
pub const SCHEMA_COMMAND: &str = "/dbschema";
pub const PROCESS_COMMAND: &str = "/process";
pub const SHOW_DBS_COMMAND: &str = "/show_dbs";
pub const USE_DB_COMMAND: &str = "/use_db";
pub const CURRENT_DB_COMMAND: &str = "/current_db";

/// Text the engine prints once its startup banner is complete
pub const DEFAULT_BANNER_MARKER: &str = "DES>";

/// Markers that end a batch or schema response. The engine output carries
/// no framing, so these are matched anywhere in the accumulated text.
pub const COMPLETION_SENTINELS: &[&str] = &[
    "Info: Batch file processed.",
    "Info: Batch file aborted.",
    "$eot",
];

// TAPI response grammar
pub const TAPI_ANSWER: &str = "answer";
pub const TAPI_SUCCESS: &str = "success";
pub const TAPI_ERROR: &str = "$error";
pub const TAPI_DELIMITER: &str = "$";
pub const TAPI_EOT: &str = "$eot";
pub const TAPI_NULL: &str = "null";
pub const TAPI_TABLE: &str = "$table";
pub const TAPI_VIEW: &str = "$view";
