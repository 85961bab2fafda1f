//! Configuration options for the EmberKv server core.

/// Configuration options for creating a server.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of logical databases.
    /// Default: 16
    pub databases: usize,

    /// Time a script may run before the server enters timed-out mode
    /// and starts servicing the event loop between interrupt ticks
    /// (in milliseconds).
    /// Default: 5000
    pub script_time_limit_ms: u64,

    /// Memory cap in bytes. Memory-enlarging commands are refused from
    /// scripts once usage crosses this limit.
    /// Set to 0 to disable the cap.
    /// Default: 0
    pub maxmemory: u64,

    /// Refuse writes when this server is a replica.
    /// Default: true
    pub replica_read_only: bool,

    /// Enable cluster mode. When enabled, the gateway asks the cluster
    /// resolver whether a command's keys are served by this node.
    /// Default: false
    pub cluster_enabled: bool,

    /// Allow commands flagged no-script to run from scripts anyway.
    /// Default: false
    pub script_disable_deny_script: bool,

    /// Maximum number of pending events drained per pump while a
    /// timed-out script is running.
    /// Default: 64
    pub event_pump_burst: usize,

    /// Commands slower than this many microseconds are recorded in the
    /// slowlog.
    /// Default: 10000 (10ms)
    pub slowlog_slower_than_us: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            databases: 16,
            script_time_limit_ms: 5000,
            maxmemory: 0,
            replica_read_only: true,
            cluster_enabled: false,
            script_disable_deny_script: false,
            event_pump_burst: 64,
            slowlog_slower_than_us: 10_000,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of logical databases.
    pub fn databases(mut self, n: usize) -> Self {
        self.databases = n;
        self
    }

    /// Sets the script time limit in milliseconds.
    pub fn script_time_limit_ms(mut self, ms: u64) -> Self {
        self.script_time_limit_ms = ms;
        self
    }

    /// Sets the memory cap in bytes (0 disables it).
    pub fn maxmemory(mut self, bytes: u64) -> Self {
        self.maxmemory = bytes;
        self
    }

    /// Sets whether replicas refuse writes.
    pub fn replica_read_only(mut self, value: bool) -> Self {
        self.replica_read_only = value;
        self
    }

    /// Enables or disables cluster mode.
    pub fn cluster_enabled(mut self, value: bool) -> Self {
        self.cluster_enabled = value;
        self
    }

    /// Allows no-script commands to run from scripts.
    pub fn script_disable_deny_script(mut self, value: bool) -> Self {
        self.script_disable_deny_script = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.databases == 0 {
            return Err(crate::Error::invalid_argument("databases must be > 0"));
        }
        if self.event_pump_burst == 0 {
            return Err(crate::Error::invalid_argument("event_pump_burst must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.databases, 16);
        assert_eq!(opts.script_time_limit_ms, 5000);
        assert_eq!(opts.maxmemory, 0);
        assert!(opts.replica_read_only);
        assert!(!opts.cluster_enabled);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .databases(4)
            .script_time_limit_ms(100)
            .maxmemory(1024)
            .cluster_enabled(true);

        assert_eq!(opts.databases, 4);
        assert_eq!(opts.script_time_limit_ms, 100);
        assert_eq!(opts.maxmemory, 1024);
        assert!(opts.cluster_enabled);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.databases = 0;
        assert!(opts.validate().is_err());

        opts.databases = 16;
        opts.event_pump_burst = 0;
        assert!(opts.validate().is_err());
    }
}
