//! The allocator façade contract (spec §4.4): a narrow adapter the session
//! task depends on. The implementation lives externally (SQL persistence,
//! the allocation algorithm, the BMP driver); this crate only states the
//! contract, plus an in-memory reference implementation in [`crate::memory`]
//! good enough to test and demo the core against.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use spalloc_error::Error;
use spalloc_util::Epoch;

use crate::types::{
    BoardLocation, Chip, JobDescriptor, JobId, JobState, MachineName, MachineSelector, Physical,
    PowerState, Triad,
};

/// A single reservation. Object-safe so sessions can hold
/// `Arc<dyn Job>` without knowing the façade's concrete type.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> JobId;
    async fn state(&self) -> JobState;
    async fn keepalive_timestamp(&self) -> SystemTime;
    async fn keepalive_host(&self) -> Option<String>;
    async fn reason(&self) -> Option<String>;
    async fn start_time(&self) -> SystemTime;
    /// Width/height of the allocated sub-machine, once allocated.
    async fn width(&self) -> Option<u32>;
    async fn height(&self) -> Option<u32>;
    async fn root_chip(&self) -> Option<Chip>;
    /// Logical/physical board description for the chip at `(x, y)` within
    /// this job's sub-machine, if one has been allocated.
    async fn where_is(&self, x: u32, y: u32) -> Result<Option<BoardLocation>, Error>;
    async fn get_machine(&self) -> Option<Arc<dyn SubMachine>>;
    /// Record a keepalive from `remote_host`. Effective no later than the
    /// instant this call returns (spec §5).
    async fn access(&self, remote_host: Option<String>) -> Result<(), Error>;
    async fn destroy(&self, reason: Option<String>) -> Result<(), Error>;
    async fn get_original_request(&self) -> Option<Vec<u8>>;
}

/// A named collection of boards.
#[async_trait]
pub trait Machine: Send + Sync {
    fn name(&self) -> &str;
    fn tags(&self) -> &HashSet<String>;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn dead_boards(&self) -> &[Physical];
    fn down_links(&self) -> &[crate::types::DownLink];
    async fn get_board_by_chip(&self, x: u32, y: u32) -> Option<Physical>;
    async fn get_board_by_logical(&self, triad: Triad) -> Option<Physical>;
    async fn get_board_by_physical(&self, physical: Physical) -> Option<Triad>;
    async fn get_board_by_ip_address(&self, ip_address: &str) -> Option<Triad>;
}

/// The subset of a machine currently allocated to a job.
#[async_trait]
pub trait SubMachine: Send + Sync {
    fn machine_name(&self) -> MachineName;
    async fn boards(&self) -> Vec<Triad>;
    /// Sequence of `(chip, hostname)` connection points into this
    /// sub-machine.
    async fn connections(&self) -> Vec<(Chip, String)>;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    async fn get_power(&self) -> PowerState;
    /// *Blocking*: may hold a write lock internally (spec §4.4).
    async fn set_power(&self, state: PowerState) -> Result<(), Error>;
}

/// A snapshot view over all jobs, with the ability to piggyback a
/// long-poll wait on the jobs epoch (spec §4.4).
#[async_trait]
pub trait JobList: Send + Sync {
    fn ids(&self) -> Vec<JobId>;
    fn jobs(&self) -> Vec<Arc<dyn Job>>;
    async fn wait_for_change(&self, timeout: Duration) -> bool;
}

/// The narrow adapter the core depends on (spec §4.4). All operations may
/// fail with `Code::Unavailable`, `Code::NotFound`, or
/// `Code::PermissionDenied`.
#[async_trait]
pub trait AllocatorFacade: Send + Sync {
    /// *Blocking*. Returns `Ok(None)` if the allocator's quota was
    /// exceeded rather than an error — the façade enforces that
    /// `machine_hint` and `tags` in `selector` are mutually exclusive
    /// before this is called.
    #[allow(clippy::too_many_arguments)]
    async fn create_job(
        &self,
        principal: &str,
        group_hint: Option<String>,
        descriptor: JobDescriptor,
        selector: MachineSelector,
        keepalive: Duration,
        orig_bytes: Option<Vec<u8>>,
    ) -> Result<Option<JobId>, Error>;

    async fn get_job(&self, principal: &str, id: JobId) -> Result<Option<Arc<dyn Job>>, Error>;

    async fn get_jobs(
        &self,
        include_destroyed: bool,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Arc<dyn JobList>, Error>;

    async fn get_machine(&self, name: &str) -> Result<Option<Arc<dyn Machine>>, Error>;

    async fn get_machines(&self) -> Result<BTreeMap<MachineName, Arc<dyn Machine>>, Error>;

    /// The jobs-domain epoch; bumped whenever any job's observable state
    /// changes.
    fn jobs_epoch(&self) -> &Epoch;

    /// The machines-domain epoch; bumped whenever the machine set or any
    /// machine's observable state changes.
    fn machines_epoch(&self) -> &Epoch;
}
