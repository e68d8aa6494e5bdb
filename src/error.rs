//! Error types for probing, resolution and target validation

use thiserror::Error;

/// Errors raised while opening sockets or exchanging ICMP messages
///
/// None of these escape a single operation: the prober turns them into a
/// failed [`ProbeResult`](crate::probe::ProbeResult) and the hop tracer turns
/// them into one diagnostic record.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Raw socket creation failed due to insufficient permissions
    #[error("Insufficient permissions: {required}")]
    InsufficientPermissions {
        /// Description of required permissions (e.g., "root or CAP_NET_RAW")
        required: String,
        /// Suggested remedy
        suggestion: String,
    },

    /// Socket creation or configuration failed for other reasons
    #[error("Failed to create socket: {0}")]
    SocketError(String),

    /// Building the echo request failed
    #[error("Failed to build ICMP message: {0}")]
    MarshalError(String),

    /// Sending the echo request failed
    #[error("Failed to send probe: {0}")]
    SendError(String),

    /// Receiving from the socket failed for a reason other than a timeout
    #[error("Failed to receive reply: {0}")]
    ReceiveError(String),

    /// A reply arrived that could not be parsed
    #[error("Malformed ICMP message")]
    MalformedPacket,
}

impl ProbeError {
    /// Map an `io::Error` raised while opening a raw socket
    pub fn from_socket_open(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::InsufficientPermissions {
                required: "root or CAP_NET_RAW".to_string(),
                suggestion: "Run with sudo or grant the binary CAP_NET_RAW".to_string(),
            }
        } else {
            ProbeError::SocketError(err.to_string())
        }
    }
}

/// Errors raised by forward and reverse DNS lookups
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The resolver reported a failure
    #[error("{0}")]
    Failed(String),

    /// The query succeeded but returned no usable record
    #[error("No record found")]
    NotFound,

    /// The cancellation scope fired before the lookup completed
    #[error("Lookup cancelled")]
    Cancelled,
}

/// Errors raised while validating a caller-supplied target list
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetParseError {
    /// No usable target was supplied
    #[error("No targets supplied")]
    Empty,

    /// An entry is neither an IPv4 literal nor a hostname
    #[error("Invalid target '{target}' at position {index}")]
    Invalid {
        /// Zero-based position of the entry in the input
        index: usize,
        /// The rejected entry
        target: String,
    },
}
