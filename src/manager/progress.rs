use std::fmt;

/// Lifecycle events reported while installing or removing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ScanningStarted,
    Acquiring { name: String },
    Installing { name: String, percent: u8 },
    FailedInstall { name: String, reason: String },
    Removing { name: String, percent: u8 },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::ScanningStarted => write!(f, "Scanning feeds..."),
            ProgressEvent::Acquiring { name } => write!(f, "Acquiring {}...", name),
            ProgressEvent::Installing { name, percent } => {
                write!(f, "Installing {} [{}%]", name, percent)
            }
            ProgressEvent::FailedInstall { name, reason } => {
                write!(f, "Failed to install {}: {}", name, reason)
            }
            ProgressEvent::Removing { name, percent } => {
                write!(f, "Removing {} [{}%]", name, percent)
            }
        }
    }
}

/// Receiver for progress events.
pub type ProgressSink<'a> = dyn FnMut(ProgressEvent) + Send + 'a;
