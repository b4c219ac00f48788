//! Runtime configuration for a connection's transport framing and file
//! manager.
//!
//! Every tunable that would otherwise be a magic number scattered through
//! the connection/file-manager layers lives here, with defaults chosen to
//! match the literal values used throughout the protocol scenarios.

/// Tunables for one connection's file manager and transport framing.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Initial capacity (bytes) reserved for the receiver's reassembly
    /// buffer.
    pub receiver_buffer_capacity: usize,
    /// Maximum capacity (bytes) the outgoing message queue is allowed to
    /// grow to before [`crate::file_manager::Worker::queue_outgoing`]
    /// starts rejecting new messages with [`crate::error::Error::Mem`].
    pub outbox_capacity: usize,
    /// Starting address for auto-assigned port-data files (§4.3 invariant
    /// ii).
    pub port_data_base_address: u32,
    /// Starting address for auto-assigned definition files (§4.3
    /// invariant iii).
    pub definition_base_address: u32,
    /// Maximum transmission unit: the largest single RemoteFile message
    /// (NumHeader length, not counting the header itself) this crate will
    /// emit in one `PUBLISH_FILE`/write message before splitting across
    /// more-bit continuations.
    pub mtu: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver_buffer_capacity: 4096,
            outbox_capacity: 256,
            port_data_base_address: 0,
            definition_base_address: crate::file_info::DEFINITION_BASE,
            mtu: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_file_info_definition_base() {
        assert_eq!(
            Config::default().definition_base_address,
            crate::file_info::DEFINITION_BASE
        );
    }
}
