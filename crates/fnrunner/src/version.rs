//! Version information for the runner.

/// Runner version from Cargo.toml.
pub const RUNNER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol variant spoken by this runner.
///
/// Version 1: `status` is a sibling of `res`/`ret` in the response envelope
/// (omitted when the guest returned none), and a load failure has its own
/// result code 2.
pub const PROTOCOL_VERSION: u32 = 1;

/// Version information printed by `--version`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub runner: &'static str,
    pub protocol: u32,
    /// Guest binding name (e.g. "rhai").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            runner: RUNNER_VERSION,
            protocol: PROTOCOL_VERSION,
            guest: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guest(mut self, guest: impl Into<String>) -> Self {
        self.guest = Some(guest.into());
        self
    }
}
