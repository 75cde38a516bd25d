use std::collections::HashSet;
use std::time::Duration;

use spalloc_facade::facade::AllocatorFacade;
use spalloc_facade::memory::{MachineSeed, MemoryFacade};
use spalloc_facade::types::{JobDescriptor, JobState, MachineSelector, PowerState};

fn facade() -> MemoryFacade {
    MemoryFacade::new(vec![MachineSeed {
        name: "m1".to_string(),
        tags: HashSet::from(["default".to_string()]),
        width: 2,
        height: 2,
    }])
}

#[tokio::test]
async fn create_job_allocates_and_bumps_jobs_epoch() {
    let facade = facade();
    let token = facade.jobs_epoch().current();
    let id = facade
        .create_job(
            "alice",
            None,
            JobDescriptor::NumBoards {
                num_boards: 1,
                max_dead_boards: None,
            },
            MachineSelector::default(),
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap()
        .expect("machine has capacity");
    assert_eq!(id, 1);
    let changed = facade
        .jobs_epoch()
        .wait_for_change(token, Duration::from_millis(50), &Default::default())
        .await;
    assert!(changed);

    let job = facade.get_job("alice", id).await.unwrap().unwrap();
    assert_eq!(job.state().await, JobState::Power);
    assert!(job.get_machine().await.is_some());
}

#[tokio::test]
async fn create_job_beyond_capacity_returns_none() {
    let facade = facade();
    let result = facade
        .create_job(
            "alice",
            None,
            JobDescriptor::NumBoards {
                num_boards: 999,
                max_dead_boards: None,
            },
            MachineSelector::default(),
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();
    // Capacity is exceeded: the job is queued with no sub-machine rather
    // than an allocator error (spec §4.5 "create_job ... Returns new job id").
    assert!(result.is_some());
    let id = result.unwrap();
    let job = facade.get_job("alice", id).await.unwrap().unwrap();
    assert_eq!(job.state().await, JobState::Queued);
    assert!(job.get_machine().await.is_none());
}

#[tokio::test]
async fn power_on_transitions_and_destroy_marks_destroyed() {
    let facade = facade();
    let id = facade
        .create_job(
            "alice",
            None,
            JobDescriptor::NumBoards {
                num_boards: 1,
                max_dead_boards: None,
            },
            MachineSelector::default(),
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap()
        .unwrap();
    let job = facade.get_job("alice", id).await.unwrap().unwrap();
    let sub = job.get_machine().await.unwrap();
    assert_eq!(sub.get_power().await, PowerState::Off);
    sub.set_power(PowerState::On).await.unwrap();
    assert_eq!(sub.get_power().await, PowerState::On);

    job.destroy(Some("done".to_string())).await.unwrap();
    assert_eq!(job.state().await, JobState::Destroyed);
    assert_eq!(job.reason().await.as_deref(), Some("done"));
}

#[tokio::test]
async fn where_is_resolves_chip_to_board() {
    let facade = facade();
    let id = facade
        .create_job(
            "alice",
            None,
            JobDescriptor::NumBoards {
                num_boards: 1,
                max_dead_boards: None,
            },
            MachineSelector::default(),
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap()
        .unwrap();
    let job = facade.get_job("alice", id).await.unwrap().unwrap();
    let location = job.where_is(1, 2).await.unwrap().unwrap();
    assert_eq!(location.chip.x, 1);
    assert_eq!(location.chip.y, 2);
    assert_eq!(location.board_chip.x, 1);
    assert_eq!(location.board_chip.y, 2);
    assert_eq!(location.job_id, Some(id));
}

#[tokio::test]
async fn get_jobs_respects_include_destroyed_limit_and_offset() {
    let facade = facade();
    for _ in 0..2 {
        facade
            .create_job(
                "alice",
                None,
                JobDescriptor::SpecificBoard(spalloc_facade::types::BoardSpec::Triad(
                    spalloc_facade::types::Triad::new(0, 0, 0).unwrap(),
                )),
                MachineSelector::default(),
                Duration::from_secs(60),
                None,
            )
            .await
            .unwrap();
    }
    let all = facade.get_jobs(true, None, 0).await.unwrap();
    assert_eq!(all.ids().len(), 2);

    let job = facade.get_job("alice", 1).await.unwrap().unwrap();
    job.destroy(None).await.unwrap();

    let live_only = facade.get_jobs(false, None, 0).await.unwrap();
    assert_eq!(live_only.ids(), vec![2]);

    let paged = facade.get_jobs(true, Some(1), 1).await.unwrap();
    assert_eq!(paged.ids(), vec![2]);
}
