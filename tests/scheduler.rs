//! Concurrency contract tests for the scheduler: thread mutual exclusion,
//! bounded parallelism, FIFO overflow, and completion propagation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use agent_dispatch::error::{AgentError, Error};
use agent_dispatch::scheduler::{AgentScheduler, Completion, SubmitOutcome};

/// Maximum time any wait is allowed before the test counts as hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn accepted(outcome: SubmitOutcome) -> Completion {
    match outcome {
        SubmitOutcome::Accepted(done) => done,
        SubmitOutcome::ThreadBusy => panic!("expected Accepted, got ThreadBusy"),
        SubmitOutcome::QueueFull => panic!("expected Accepted, got QueueFull"),
    }
}

async fn wait(done: Completion) -> Result<(), Error> {
    timeout(TEST_TIMEOUT, done.wait()).await.expect("job hung")
}

#[tokio::test]
async fn runs_accepted_work() {
    let scheduler = AgentScheduler::default();
    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);

    let done = accepted(scheduler.submit("t1", move || async move {
        *flag.lock().unwrap() = true;
        Ok(())
    }));
    wait(done).await.unwrap();
    assert!(*ran.lock().unwrap());
}

#[tokio::test]
async fn returns_thread_busy_for_duplicate_thread() {
    let scheduler = AgentScheduler::default();
    let _running = accepted(scheduler.submit("t1", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));

    // The first job has not resolved; resubmission must see it.
    let outcome = scheduler.submit("t1", || async { Ok(()) });
    assert!(matches!(outcome, SubmitOutcome::ThreadBusy));
}

#[tokio::test]
async fn allows_reuse_after_completion() {
    let scheduler = AgentScheduler::default();
    let first = accepted(scheduler.submit("t1", || async { Ok(()) }));
    wait(first).await.unwrap();

    let second = accepted(scheduler.submit("t1", || async { Ok(()) }));
    wait(second).await.unwrap();
}

#[tokio::test]
async fn queues_excess_work_until_a_slot_frees() {
    let scheduler = AgentScheduler::new(1, 10);
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let order_a = Arc::clone(&order);
    let done_a = accepted(scheduler.submit("t1", move || async move {
        release_rx.await.ok();
        order_a.lock().unwrap().push("a");
        Ok(())
    }));

    let order_b = Arc::clone(&order);
    let done_b = accepted(scheduler.submit("t2", move || async move {
        order_b.lock().unwrap().push("b");
        Ok(())
    }));

    // t2 is queued behind the blocked t1 and must not have run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(order.lock().unwrap().is_empty());

    release_tx.send(()).unwrap();
    wait(done_a).await.unwrap();
    wait(done_b).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn returns_queue_full_when_saturated() {
    let scheduler = AgentScheduler::new(1, 1);
    // Fills the running slot.
    let _r1 = accepted(scheduler.submit("t1", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));
    // Fills the queue.
    let _r2 = accepted(scheduler.submit("t2", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));

    let outcome = scheduler.submit("t3", || async { Ok(()) });
    assert!(matches!(outcome, SubmitOutcome::QueueFull));
}

#[tokio::test]
async fn thread_busy_takes_precedence_over_queue_full() {
    let scheduler = AgentScheduler::new(1, 0);
    let _r1 = accepted(scheduler.submit("t1", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));

    // Saturated scheduler, but the duplicate thread is reported as busy.
    let outcome = scheduler.submit("t1", || async { Ok(()) });
    assert!(matches!(outcome, SubmitOutcome::ThreadBusy));

    let outcome = scheduler.submit("t2", || async { Ok(()) });
    assert!(matches!(outcome, SubmitOutcome::QueueFull));
}

#[tokio::test]
async fn propagates_errors_from_work_unwrapped() {
    let scheduler = AgentScheduler::default();
    let done = accepted(scheduler.submit("t1", || async {
        Err(Error::Agent(AgentError::RequestFailed("boom".into())))
    }));

    match wait(done).await {
        Err(Error::Agent(AgentError::RequestFailed(msg))) => assert_eq!(msg, "boom"),
        other => panic!("expected the exact submitted error, got {other:?}"),
    }
}

#[tokio::test]
async fn frees_thread_after_a_failed_job() {
    let scheduler = AgentScheduler::default();
    let done = accepted(scheduler.submit("t1", || async {
        Err(Error::Agent(AgentError::RequestFailed("boom".into())))
    }));
    wait(done).await.unwrap_err();

    // Immediately after the failure resolves, the thread id is free again.
    let retry = accepted(scheduler.submit("t1", || async { Ok(()) }));
    wait(retry).await.unwrap();
}

#[tokio::test]
async fn drains_queue_in_fifo_order() {
    let scheduler = AgentScheduler::new(1, 10);
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let order_a = Arc::clone(&order);
    let done_a = accepted(scheduler.submit("t1", move || async move {
        release_rx.await.ok();
        order_a.lock().unwrap().push("first");
        Ok(())
    }));
    let order_b = Arc::clone(&order);
    let done_b = accepted(scheduler.submit("t2", move || async move {
        order_b.lock().unwrap().push("second");
        Ok(())
    }));
    let order_c = Arc::clone(&order);
    let done_c = accepted(scheduler.submit("t3", move || async move {
        order_c.lock().unwrap().push("third");
        Ok(())
    }));

    release_tx.send(()).unwrap();
    wait(done_a).await.unwrap();
    wait(done_b).await.unwrap();
    wait(done_c).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn capacity_recovers_after_queue_full() {
    let scheduler = AgentScheduler::new(1, 1);
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let done_a = accepted(scheduler.submit("t1", move || async move {
        release_rx.await.ok();
        Ok(())
    }));
    let done_b = accepted(scheduler.submit("t2", || async { Ok(()) }));
    assert!(matches!(
        scheduler.submit("t3", || async { Ok(()) }),
        SubmitOutcome::QueueFull
    ));

    release_tx.send(()).unwrap();
    wait(done_a).await.unwrap();
    wait(done_b).await.unwrap();

    // Slots drained; the previously rejected thread is admitted now.
    let done_c = accepted(scheduler.submit("t3", || async { Ok(()) }));
    wait(done_c).await.unwrap();
}

#[tokio::test]
async fn counters_track_running_and_queued_jobs() {
    let scheduler = AgentScheduler::new(2, 10);
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let done_a = accepted(scheduler.submit("t1", move || async move {
        release_rx.await.ok();
        Ok(())
    }));
    let _done_b = accepted(scheduler.submit("t2", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));
    let _done_c = accepted(scheduler.submit("t3", || async {
        futures::future::pending::<()>().await;
        Ok(())
    }));

    assert_eq!(scheduler.running_count(), 2);
    assert_eq!(scheduler.queue_depth(), 1);

    release_tx.send(()).unwrap();
    wait(done_a).await.unwrap();

    // t1 finished and handed its slot to t3.
    assert_eq!(scheduler.running_count(), 2);
    assert_eq!(scheduler.queue_depth(), 0);
}
