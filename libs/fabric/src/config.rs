use std::time::Duration;

/// Default ceiling for a single frame on the wire (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Settings shared by every framed transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound for establishing an outbound connection
    pub connect_timeout: Option<Duration>,

    /// Upper bound for writing a single frame
    pub send_timeout: Option<Duration>,

    /// Upper bound for reading the rest of a frame once it has started
    ///
    /// Idle time between frames is not limited.
    pub receive_timeout: Option<Duration>,

    /// Largest frame accepted or produced, in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            send_timeout: None,
            receive_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the connect timeout, `None` waits forever
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the per-frame send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Builder: set the per-frame receive timeout
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Builder: set the maximum frame size
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.send_timeout, None);
        assert_eq!(config.receive_timeout, None);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn custom_config() {
        let config = TransportConfig::new()
            .with_connect_timeout(None)
            .with_send_timeout(Duration::from_millis(5))
            .with_receive_timeout(Duration::from_millis(7))
            .with_max_frame_size(1024);

        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.send_timeout, Some(Duration::from_millis(5)));
        assert_eq!(config.receive_timeout, Some(Duration::from_millis(7)));
        assert_eq!(config.max_frame_size, 1024);
    }
}
