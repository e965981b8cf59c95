/// Hard cap on the length of a single command line received on the
/// control channel. Overlong lines are discarded to protect against
/// memory exhaustion.
pub const MAX_COMMAND_LINE: usize = 2048;

/// Block size used when streaming file data over the data channel.
pub const DATA_BUFFER_SIZE: usize = 65536;

/// How many entries a listing producer pulls from its iterator before
/// handing a chunk to the channel.
pub const ITERATOR_PRODUCER_LOOPS: usize = 20;

/// Seconds a passive or active data endpoint may wait for the peer
/// before being torn down with a 421.
pub const DATA_CONNECTION_TIMEOUT: u64 = 30;

/// Replies longer than this are sent in `xyz-` multi-line form.
pub const MAX_SINGLE_LINE_REPLY: usize = 75;

/// Attempts made by STOU to find a non-existing unique file name.
pub const STOU_MAX_ATTEMPTS: u32 = 100;

/// Bounded retry count for the TLS close-notify exchange.
pub const TLS_SHUTDOWN_RETRIES: u32 = 8;

pub const SERVER_NAME: &str = concat!("ferroftpd ", env!("CARGO_PKG_VERSION"));
