use super::error::StreamError;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → starting → running ↔ paused
///                      ↓        ↓
///                   stopping → idle
///
/// starting / running / paused / stopping ──device fault──→ error ──reset──→ idle
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error(StreamError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether a session currently holds the input device.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Paused | Self::Stopping
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error(_) => "error",
        }
    }
}
