mod common;

use std::time::Duration;

use tokio::sync::broadcast;

use common::{Harness, GROUP};
use saferide_dispatcher::{DispatchWorkerPool, TriggerQueue, TriggerRouter};
use saferide_domain::RequestStatus;
use saferide_testing_utils::{sample_pickup, TestEnv};

struct Running {
    shutdown: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        for handle in self.handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("background task should stop")
                .unwrap();
        }
    }
}

fn start_bus(h: &Harness, workers: usize) -> Running {
    let (shutdown, _) = broadcast::channel(4);
    let (queue, receiver) = TriggerQueue::channel(64);
    let router = TriggerRouter::new(h.dyn_store(), h.clock.clone(), queue);
    let pool = DispatchWorkerPool::new(h.service.matcher(), receiver, workers);

    let mut handles = pool.spawn(shutdown.subscribe());
    handles.push(tokio::spawn(router.run(shutdown.subscribe())));
    Running { shutdown, handles }
}

async fn status_of(h: &Harness, id: &str) -> RequestStatus {
    h.request(id).await.value.status
}

#[tokio::test]
async fn test_new_request_is_bound_by_worker_pool() {
    let h = Harness::new();
    h.start_driver("driver").await;
    let running = start_bus(&h, 2);

    h.seed_rider("rider", 2).await;
    let request = h.service.create_request("rider", sample_pickup()).await.unwrap();

    let harness = &h;
    let id = request.id.as_str();
    let bound = TestEnv::wait_for(
        || async move { status_of(harness, id).await == RequestStatus::Bound },
        Duration::from_secs(3),
    )
    .await;
    assert!(bound);
    assert_eq!(h.request(id).await.value.driver_id.as_deref(), Some("driver"));

    running.stop().await;
}

#[tokio::test]
async fn test_driver_becoming_available_drains_queue() {
    let h = Harness::new();
    h.start_driver("driver").await;
    h.service.toggle_driver_availability("driver", false).await.unwrap();
    let running = start_bus(&h, 2);

    let mut ids = Vec::new();
    for rider in ["r1", "r2", "r3"] {
        h.seed_rider(rider, 1).await;
        ids.push(h.service.create_request(rider, sample_pickup()).await.unwrap().id);
    }

    // 没有可接单司机，请求保持 Open
    tokio::time::sleep(Duration::from_millis(200)).await;
    for id in &ids {
        assert_eq!(status_of(&h, id).await, RequestStatus::Open);
    }

    h.service.toggle_driver_availability("driver", true).await.unwrap();
    let harness = &h;
    let ids_ref = &ids;
    let drained = TestEnv::wait_for(
        || async move {
            for id in ids_ref {
                if status_of(harness, id).await != RequestStatus::Bound {
                    return false;
                }
            }
            true
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(drained);

    running.stop().await;
}

#[tokio::test]
async fn test_cancel_frees_capacity_for_next_request() {
    let h = Harness::new();
    let running = start_bus(&h, 1);

    h.seed_rider("first", 1).await;
    let first = h.service.create_request("first", sample_pickup()).await.unwrap();
    // 司机上线后第一单被绑定
    h.start_driver("driver").await;

    let harness = &h;
    let first_id = first.id.as_str();
    assert!(
        TestEnv::wait_for(
            || async move { status_of(harness, first_id).await == RequestStatus::Bound },
            Duration::from_secs(3),
        )
        .await
    );

    h.service.cancel_request(first_id, None).await.unwrap();
    h.service.toggle_driver_availability("driver", false).await.unwrap();
    h.seed_rider("second", 1).await;
    let second = h.service.create_request("second", sample_pickup()).await.unwrap();
    h.service.toggle_driver_availability("driver", true).await.unwrap();

    let second_id = second.id.as_str();
    assert!(
        TestEnv::wait_for(
            || async move { status_of(harness, second_id).await == RequestStatus::Bound },
            Duration::from_secs(3),
        )
        .await
    );

    let queue = h.service.list_open_requests(GROUP).await.unwrap();
    assert_eq!(queue.len(), 1);
    running.stop().await;
}
