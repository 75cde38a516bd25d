//! Domain types shared by the allocator façade contract (spec §3, §4.4).

use std::collections::HashSet;

/// Jobs are positive integers (spec §3).
pub type JobId = u64;

/// Machines are non-empty strings (spec §3).
pub type MachineName = String;

/// Triad coordinates: `x,y ≥ 0`, `z ∈ {0,1,2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triad {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl Triad {
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, spalloc_error::Error> {
        spalloc_error::error_if!(z > 2, "bad input: z coordinate {z} is not in 0..=2");
        Ok(Triad { x, y, z })
    }
}

/// Physical coordinates: all non-negative integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Physical {
    pub cabinet: u32,
    pub frame: u32,
    pub board: u32,
}

/// A chip coordinate within a board's 2D chip grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chip {
    pub x: u32,
    pub y: u32,
}

/// Job lifecycle states as observed by the client (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Power,
    Ready,
    Destroyed,
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Power => "POWER",
            JobState::Ready => "READY",
            JobState::Destroyed => "DESTROYED",
            JobState::Unknown => "UNKNOWN",
        }
    }
}

/// Power state of a sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// A board identified one of three ways for `create_job`'s `SpecificBoard`
/// variant and for `where_is`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardSpec {
    Triad(Triad),
    Physical(Physical),
    IpAddress(String),
}

/// How many / which boards a new job is requesting (spec §4.5 `create_job`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDescriptor {
    NumBoards {
        num_boards: u32,
        max_dead_boards: Option<u32>,
    },
    Dimensions {
        width: u32,
        height: u32,
        max_dead_boards: Option<u32>,
    },
    SpecificBoard(BoardSpec),
}

/// Either a machine hint or a tag set may be given to `create_job`, never
/// both (the façade enforces this — spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineSelector {
    Hint(MachineName),
    Tags(HashSet<String>),
}

impl Default for MachineSelector {
    fn default() -> Self {
        MachineSelector::Tags(HashSet::from(["default".to_string()]))
    }
}

/// Result of a `where_is` / `Job::where_is` lookup (spec §8 scenario 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardLocation {
    pub machine: MachineName,
    pub logical: Triad,
    pub physical: Physical,
    pub chip: Chip,
    pub board_chip: Chip,
    pub job_id: Option<JobId>,
    pub job_chip: Option<Chip>,
}

/// A down inter-board link, as exposed by `Machine::down_links`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownLink {
    pub from: Physical,
    pub to: Physical,
}
