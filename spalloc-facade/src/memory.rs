//! An in-memory reference implementation of [`crate::facade::AllocatorFacade`].
//!
//! Good enough to drive the session/notifier tests and the demo binary
//! against; not a substitute for the real SQL-backed allocator, which is
//! out of scope for this crate (spec §1). Board topology is modelled as a
//! flat grid of 8×8-chip boards per triad slot rather than the real
//! SpiNNaker hex topology — adequate for exercising the wire contract.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::RwLock;

use spalloc_error::Error;
use spalloc_util::Epoch;

use crate::facade::{AllocatorFacade, Job, JobList, Machine, SubMachine};
use crate::types::{
    BoardLocation, Chip, DownLink, JobDescriptor, JobId, JobState, MachineSelector, Physical,
    PowerState, Triad,
};

const CHIPS_PER_BOARD_SIDE: u32 = 8;

struct JobData {
    state: JobState,
    keepalive_timestamp: SystemTime,
    keepalive_host: Option<String>,
    reason: Option<String>,
    sub_machine: Option<Arc<MemorySubMachine>>,
}

pub struct MemoryJob {
    id: JobId,
    owner: String,
    start_time: SystemTime,
    orig_bytes: Option<Vec<u8>>,
    data: RwLock<JobData>,
    jobs_epoch: Epoch,
}

#[async_trait]
impl Job for MemoryJob {
    fn id(&self) -> JobId {
        self.id
    }

    async fn state(&self) -> JobState {
        self.data.read().await.state
    }

    async fn keepalive_timestamp(&self) -> SystemTime {
        self.data.read().await.keepalive_timestamp
    }

    async fn keepalive_host(&self) -> Option<String> {
        self.data.read().await.keepalive_host.clone()
    }

    async fn reason(&self) -> Option<String> {
        self.data.read().await.reason.clone()
    }

    async fn start_time(&self) -> SystemTime {
        self.start_time
    }

    async fn width(&self) -> Option<u32> {
        let data = self.data.read().await;
        data.sub_machine.as_ref().map(|sub| sub.width())
    }

    async fn height(&self) -> Option<u32> {
        let data = self.data.read().await;
        data.sub_machine.as_ref().map(|sub| sub.height())
    }

    async fn root_chip(&self) -> Option<Chip> {
        let data = self.data.read().await;
        data.sub_machine
            .as_ref()
            .map(|_| Chip { x: 0, y: 0 })
    }

    async fn where_is(&self, x: u32, y: u32) -> Result<Option<BoardLocation>, Error> {
        let data = self.data.read().await;
        let Some(sub) = &data.sub_machine else {
            return Ok(None);
        };
        let board_x = x / CHIPS_PER_BOARD_SIDE;
        let board_y = y / CHIPS_PER_BOARD_SIDE;
        let board_chip = Chip {
            x: x % CHIPS_PER_BOARD_SIDE,
            y: y % CHIPS_PER_BOARD_SIDE,
        };
        let Some(triad) = sub.board_at(board_x, board_y) else {
            return Ok(None);
        };
        Ok(Some(BoardLocation {
            machine: sub.machine_name(),
            logical: triad,
            physical: triad_to_physical(triad),
            chip: Chip { x, y },
            board_chip,
            job_id: Some(self.id),
            job_chip: Some(Chip { x, y }),
        }))
    }

    async fn get_machine(&self) -> Option<Arc<dyn SubMachine>> {
        let data = self.data.read().await;
        data.sub_machine
            .clone()
            .map(|sub| sub as Arc<dyn SubMachine>)
    }

    async fn access(&self, remote_host: Option<String>) -> Result<(), Error> {
        let mut data = self.data.write().await;
        data.keepalive_timestamp = SystemTime::now();
        data.keepalive_host = remote_host;
        Ok(())
    }

    async fn destroy(&self, reason: Option<String>) -> Result<(), Error> {
        let mut data = self.data.write().await;
        data.state = JobState::Destroyed;
        data.reason = reason;
        data.sub_machine = None;
        drop(data);
        self.jobs_epoch.bump();
        Ok(())
    }

    async fn get_original_request(&self) -> Option<Vec<u8>> {
        self.orig_bytes.clone()
    }
}

pub struct MemorySubMachine {
    machine_name: String,
    boards: Vec<Triad>,
    width: u32,
    height: u32,
    power: RwLock<PowerState>,
    jobs_epoch: Epoch,
    job_id: JobId,
}

impl MemoryJob {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl MemorySubMachine {
    fn board_at(&self, board_x: u32, board_y: u32) -> Option<Triad> {
        self.boards
            .iter()
            .copied()
            .find(|t| t.x == board_x && t.y == board_y)
    }
}

#[async_trait]
impl SubMachine for MemorySubMachine {
    fn machine_name(&self) -> String {
        self.machine_name.clone()
    }

    async fn boards(&self) -> Vec<Triad> {
        self.boards.clone()
    }

    async fn connections(&self) -> Vec<(Chip, String)> {
        self.boards
            .iter()
            .map(|t| {
                (
                    Chip {
                        x: t.x * CHIPS_PER_BOARD_SIDE,
                        y: t.y * CHIPS_PER_BOARD_SIDE,
                    },
                    format!("{}-board-{}-{}-{}", self.machine_name, t.x, t.y, t.z),
                )
            })
            .collect()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    async fn get_power(&self) -> PowerState {
        *self.power.read().await
    }

    async fn set_power(&self, state: PowerState) -> Result<(), Error> {
        *self.power.write().await = state;
        self.jobs_epoch.bump();
        let _ = self.job_id;
        Ok(())
    }
}

fn triad_to_physical(triad: Triad) -> Physical {
    // Deterministic, reversible placeholder mapping; the real physical
    // layout comes from the (external) machine-definition loader.
    Physical {
        cabinet: triad.x,
        frame: triad.y,
        board: u32::from(triad.z),
    }
}

fn physical_to_triad(physical: Physical) -> Option<Triad> {
    if physical.board > 2 {
        return None;
    }
    Some(Triad {
        x: physical.cabinet,
        y: physical.frame,
        z: physical.board as u8,
    })
}

pub struct MemoryMachine {
    name: String,
    tags: HashSet<String>,
    width: u32,
    height: u32,
    dead_boards: Vec<Physical>,
    down_links: Vec<DownLink>,
    allocated: RwLock<HashSet<(u32, u32, u8)>>,
}

#[async_trait]
impl Machine for MemoryMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn dead_boards(&self) -> &[Physical] {
        &self.dead_boards
    }

    fn down_links(&self) -> &[DownLink] {
        &self.down_links
    }

    async fn get_board_by_chip(&self, x: u32, y: u32) -> Option<Physical> {
        let triad = Triad {
            x: x / CHIPS_PER_BOARD_SIDE,
            y: y / CHIPS_PER_BOARD_SIDE,
            z: 0,
        };
        if triad.x < self.width && triad.y < self.height {
            Some(triad_to_physical(triad))
        } else {
            None
        }
    }

    async fn get_board_by_logical(&self, triad: Triad) -> Option<Physical> {
        if triad.x < self.width && triad.y < self.height {
            Some(triad_to_physical(triad))
        } else {
            None
        }
    }

    async fn get_board_by_physical(&self, physical: Physical) -> Option<Triad> {
        physical_to_triad(physical).filter(|t| t.x < self.width && t.y < self.height)
    }

    async fn get_board_by_ip_address(&self, _ip_address: &str) -> Option<Triad> {
        None
    }
}

struct MemoryState {
    next_job_id: JobId,
    jobs: HashMap<JobId, Arc<MemoryJob>>,
    machines: BTreeMap<String, Arc<MemoryMachine>>,
}

pub struct MemoryFacade {
    state: RwLock<MemoryState>,
    jobs_epoch: Epoch,
    machines_epoch: Epoch,
}

/// Description of one machine to seed a [`MemoryFacade`] with, for tests
/// and the demo binary.
pub struct MachineSeed {
    pub name: String,
    pub tags: HashSet<String>,
    pub width: u32,
    pub height: u32,
}

impl MemoryFacade {
    pub fn new(seeds: Vec<MachineSeed>) -> Self {
        let machines = seeds
            .into_iter()
            .map(|seed| {
                (
                    seed.name.clone(),
                    Arc::new(MemoryMachine {
                        name: seed.name,
                        tags: seed.tags,
                        width: seed.width,
                        height: seed.height,
                        dead_boards: Vec::new(),
                        down_links: Vec::new(),
                        allocated: RwLock::new(HashSet::new()),
                    }),
                )
            })
            .collect();
        MemoryFacade {
            state: RwLock::new(MemoryState {
                next_job_id: 1,
                jobs: HashMap::new(),
                machines,
            }),
            jobs_epoch: Epoch::new(),
            machines_epoch: Epoch::new(),
        }
    }

    fn requested_board_count(descriptor: &JobDescriptor) -> u32 {
        match descriptor {
            JobDescriptor::NumBoards { num_boards, .. } => *num_boards,
            JobDescriptor::Dimensions { width, height, .. } => width * height * 3,
            JobDescriptor::SpecificBoard(_) => 1,
        }
    }

    async fn pick_machine(
        &self,
        state: &MemoryState,
        selector: &MachineSelector,
    ) -> Option<Arc<MemoryMachine>> {
        match selector {
            MachineSelector::Hint(name) => state.machines.get(name).cloned(),
            MachineSelector::Tags(tags) => state
                .machines
                .values()
                .find(|m| m.tags.iter().any(|t| tags.contains(t)))
                .cloned(),
        }
    }

    async fn try_allocate(
        machine: &Arc<MemoryMachine>,
        num_boards: u32,
    ) -> Option<Vec<Triad>> {
        let mut allocated = machine.allocated.write().await;
        let mut free = Vec::new();
        'outer: for y in 0..machine.height {
            for x in 0..machine.width {
                for z in 0..3u8 {
                    if free.len() as u32 >= num_boards {
                        break 'outer;
                    }
                    if !allocated.contains(&(x, y, z)) {
                        free.push(Triad { x, y, z });
                    }
                }
            }
        }
        if free.len() as u32 != num_boards {
            return None;
        }
        for triad in &free {
            allocated.insert((triad.x, triad.y, triad.z));
        }
        Some(free)
    }
}

#[async_trait]
impl AllocatorFacade for MemoryFacade {
    async fn create_job(
        &self,
        owner: &str,
        _group_hint: Option<String>,
        descriptor: JobDescriptor,
        selector: MachineSelector,
        _keepalive: Duration,
        orig_bytes: Option<Vec<u8>>,
    ) -> Result<Option<JobId>, Error> {
        let num_boards = Self::requested_board_count(&descriptor);
        let mut state = self.state.write().await;
        let Some(machine) = self.pick_machine(&state, &selector).await else {
            return Ok(None);
        };
        let id = state.next_job_id;
        let sub_machine = match Self::try_allocate(&machine, num_boards).await {
            Some(boards) => {
                let dims = (num_boards as f64).sqrt().ceil() as u32;
                Some(Arc::new(MemorySubMachine {
                    machine_name: machine.name.clone(),
                    boards,
                    width: dims.max(1),
                    height: dims.max(1),
                    power: RwLock::new(PowerState::Off),
                    jobs_epoch: self.jobs_epoch.clone(),
                    job_id: id,
                }))
            }
            None => None,
        };
        let job_state = if sub_machine.is_some() {
            JobState::Power
        } else {
            JobState::Queued
        };
        let now = SystemTime::now();
        let job = Arc::new(MemoryJob {
            id,
            owner: owner.to_string(),
            start_time: now,
            orig_bytes,
            data: RwLock::new(JobData {
                state: job_state,
                keepalive_timestamp: now,
                keepalive_host: None,
                reason: None,
                sub_machine,
            }),
            jobs_epoch: self.jobs_epoch.clone(),
        });
        state.next_job_id += 1;
        state.jobs.insert(id, job);
        drop(state);
        self.jobs_epoch.bump();
        Ok(Some(id))
    }

    async fn get_job(&self, _principal: &str, id: JobId) -> Result<Option<Arc<dyn Job>>, Error> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&id).cloned().map(|j| j as Arc<dyn Job>))
    }

    async fn get_jobs(
        &self,
        include_destroyed: bool,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Arc<dyn JobList>, Error> {
        let state = self.state.read().await;
        let mut jobs: Vec<Arc<MemoryJob>> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        let mut jobs: Vec<Arc<MemoryJob>> = {
            let mut filtered = Vec::new();
            for job in jobs.drain(..) {
                let destroyed = job.data.read().await.state == JobState::Destroyed;
                if include_destroyed || !destroyed {
                    filtered.push(job);
                }
            }
            filtered
        };
        jobs = jobs.into_iter().skip(offset).collect();
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(Arc::new(MemoryJobList {
            ids: jobs.iter().map(|j| j.id).collect(),
            jobs: jobs.into_iter().map(|j| j as Arc<dyn Job>).collect(),
            epoch: self.jobs_epoch.clone(),
        }))
    }

    async fn get_machine(&self, name: &str) -> Result<Option<Arc<dyn Machine>>, Error> {
        let state = self.state.read().await;
        Ok(state
            .machines
            .get(name)
            .cloned()
            .map(|m| m as Arc<dyn Machine>))
    }

    async fn get_machines(
        &self,
    ) -> Result<BTreeMap<String, Arc<dyn Machine>>, Error> {
        let state = self.state.read().await;
        Ok(state
            .machines
            .iter()
            .map(|(name, m)| (name.clone(), m.clone() as Arc<dyn Machine>))
            .collect())
    }

    fn jobs_epoch(&self) -> &Epoch {
        &self.jobs_epoch
    }

    fn machines_epoch(&self) -> &Epoch {
        &self.machines_epoch
    }
}

struct MemoryJobList {
    ids: Vec<JobId>,
    jobs: Vec<Arc<dyn Job>>,
    epoch: Epoch,
}

#[async_trait]
impl JobList for MemoryJobList {
    fn ids(&self) -> Vec<JobId> {
        self.ids.clone()
    }

    fn jobs(&self) -> Vec<Arc<dyn Job>> {
        self.jobs.clone()
    }

    async fn wait_for_change(&self, timeout: Duration) -> bool {
        let token = self.epoch.current();
        self.epoch
            .wait_for_change(token, timeout, &tokio_util::sync::CancellationToken::new())
            .await
    }
}
