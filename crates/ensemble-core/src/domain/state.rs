//! States for tasks, stages and pipelines.
//!
//! All three entity kinds draw their states from one ranked ordering:
//!
//! ```text
//! DESCRIBED(1) -> SCHEDULING(2) -> SCHEDULED(3) -> SUBMITTING(4) -> SUBMITTED(5)
//!   -> EXECUTED(6) -> DEQUEUEING(7) -> DEQUEUED(8) -> DONE | FAILED | CANCELED (9)
//! ```
//!
//! Stages and pipelines use a subset of it but keep the same rank values, so
//! ranks compare meaningfully across entity kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rank shared by all final states.
pub const FINAL_RANK: u8 = 9;

/// Behaviour shared by the three state enums.
pub trait EntityState: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn rank(self) -> u8;

    fn is_terminal(self) -> bool {
        self.rank() == FINAL_RANK
    }

    fn as_str(self) -> &'static str;
}

/// How a proposed transition relates to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    /// Strictly higher rank, non-terminal target.
    Forward,
    /// Same state again (redelivered batches produce these).
    Duplicate,
    /// Any non-terminal state jumping to a final state.
    Terminal,
    /// Lower rank, or leaving a final state.
    Backward,
}

/// Classify `from -> to` purely by rank.
pub fn classify<S: EntityState>(from: S, to: S) -> Progression {
    if from == to {
        return Progression::Duplicate;
    }
    if from.is_terminal() {
        return Progression::Backward;
    }
    if to.is_terminal() {
        return Progression::Terminal;
    }
    if to.rank() > from.rank() {
        Progression::Forward
    } else {
        Progression::Backward
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Described,
    Scheduling,
    Scheduled,
    Submitting,
    Submitted,
    Executed,
    Dequeueing,
    Dequeued,
    Done,
    Failed,
    Canceled,
}

impl EntityState for TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Described => 1,
            TaskState::Scheduling => 2,
            TaskState::Scheduled => 3,
            TaskState::Submitting => 4,
            TaskState::Submitted => 5,
            TaskState::Executed => 6,
            TaskState::Dequeueing => 7,
            TaskState::Dequeued => 8,
            TaskState::Done | TaskState::Failed | TaskState::Canceled => FINAL_RANK,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TaskState::Described => "DESCRIBED",
            TaskState::Scheduling => "SCHEDULING",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Submitting => "SUBMITTING",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Executed => "EXECUTED",
            TaskState::Dequeueing => "DEQUEUEING",
            TaskState::Dequeued => "DEQUEUED",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
            TaskState::Canceled => "CANCELED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    #[default]
    Described,
    Scheduling,
    Scheduled,
    Done,
    Failed,
    Canceled,
}

impl EntityState for StageState {
    fn rank(self) -> u8 {
        match self {
            StageState::Described => 1,
            StageState::Scheduling => 2,
            StageState::Scheduled => 3,
            StageState::Done | StageState::Failed | StageState::Canceled => FINAL_RANK,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            StageState::Described => "DESCRIBED",
            StageState::Scheduling => "SCHEDULING",
            StageState::Scheduled => "SCHEDULED",
            StageState::Done => "DONE",
            StageState::Failed => "FAILED",
            StageState::Canceled => "CANCELED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    #[default]
    Described,
    Scheduling,
    Done,
    Failed,
    Canceled,
}

impl EntityState for PipelineState {
    fn rank(self) -> u8 {
        match self {
            PipelineState::Described => 1,
            PipelineState::Scheduling => 2,
            PipelineState::Done | PipelineState::Failed | PipelineState::Canceled => FINAL_RANK,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PipelineState::Described => "DESCRIBED",
            PipelineState::Scheduling => "SCHEDULING",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
            PipelineState::Canceled => "CANCELED",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(TaskState, StageState, PipelineState);
