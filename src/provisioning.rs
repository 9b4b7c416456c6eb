use crate::error::IntakeResult;
use async_trait::async_trait;
use bitflags::bitflags;
use std::fmt::{Display, Formatter};

pub mod postgres;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ImportOptions: u8 {
        const ERASE_CURRENT_PASSWORD = 0b0001;
        const ERASE_CURRENT_QUOTA =    0b0010;
        const QUEUE_CANVAS =           0b0100;
        const PROCESS_CANVAS =         0b1000;
    }
}

/// Result of one Canvas queue step. Polling stops on `Finished`; the message
/// text is only reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasStep {
    Progressed(String),
    Finished(String),
}

impl CanvasStep {
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Progressed(m) | Self::Finished(m) => m,
        }
    }
}

impl Display for CanvasStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Account creation plus the directory and Canvas side effects for one
/// import batch. Every method works on the rows of a single `sheet_name`,
/// except the Canvas step, which drains a shared queue.
#[async_trait]
pub trait StudentProvisioner: Send + Sync {
    /// Drops any cached directory session before a new batch starts.
    async fn close_directory(&self) -> IntakeResult<()>;

    /// Returns the number of accounts newly created.
    async fn create_accounts(&self, sheet_name: &str, options: ImportOptions) -> IntakeResult<u64>;

    async fn queue_active_directory_imports(&self, sheet_name: &str) -> IntakeResult<u64>;

    async fn queue_canvas_imports(&self, sheet_name: &str) -> IntakeResult<u64>;

    async fn process_canvas_student(&self) -> IntakeResult<CanvasStep>;
}
