mod support;

use chrono::Duration;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use elschool_bot::database::models::AutosendSetting;
use elschool_bot::database::store::NotificationStore;
use elschool_bot::error::SchedulerError;
use elschool_bot::services::scheduler::{Completion, DelayScheduler, FiredTask, TaskKey};
use elschool_bot::utils::datetime::RepeatInterval;
use support::{local, offset, settings, time, ManualClock, MemoryStore};

fn scheduler(
    store: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
) -> (Arc<DelayScheduler>, UnboundedReceiver<FiredTask>) {
    let (scheduler, fired) = DelayScheduler::new(store.clone(), clock.clone(), offset());
    (Arc::new(scheduler), fired)
}

async fn next_fire(fired: &mut UnboundedReceiver<FiredTask>) -> Option<FiredTask> {
    tokio::time::timeout(std::time::Duration::from_secs(3 * 86_400), fired.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test(start_paused = true)]
async fn test_schedule_fires_once_at_local_time() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 11, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    let fire_at = scheduler.schedule(1, 1, Some(time(12, 0))).unwrap();
    assert_eq!(fire_at, local(2024, 3, 10, 12, 0));
    assert_eq!((fire_at - local(2024, 3, 10, 11, 0)).num_seconds(), 3600);

    let task = next_fire(&mut fired).await.unwrap();
    assert_eq!(task.key, TaskKey::new(1, 1));
    assert_eq!(task.fire_at, fire_at);
    assert!(scheduler.claim(task.key, task.generation));
}

#[tokio::test]
async fn test_schedule_rolls_past_time_to_tomorrow() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 10, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    let fire_at = scheduler.schedule(1, 1, Some(time(9, 0))).unwrap();
    assert_eq!(fire_at, local(2024, 3, 11, 9, 0));
    assert_eq!((fire_at - local(2024, 3, 10, 10, 0)).num_hours(), 23);

    // exactly now is not in the future either
    let fire_at = scheduler.schedule(1, 2, Some(time(10, 0))).unwrap();
    assert_eq!(fire_at, local(2024, 3, 11, 10, 0));
}

#[tokio::test]
async fn test_schedule_without_time_is_rejected() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 10, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    let result = scheduler.schedule(4, 2, None);
    assert!(matches!(
        result,
        Err(SchedulerError::MissingTime {
            user_id: 4,
            notification_id: 2
        })
    ));
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_replacing_schedule_leaves_one_task() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(5, 7, Some(time(10, 0))).unwrap();
    scheduler.schedule(5, 7, Some(time(11, 0))).unwrap();

    assert_eq!(scheduler.len(), 1);
    assert_eq!(scheduler.fire_time(5, 7), Some(local(2024, 3, 10, 11, 0)));

    let task = next_fire(&mut fired).await.unwrap();
    assert_eq!(task.fire_at, local(2024, 3, 10, 11, 0));
    assert!(scheduler.claim(task.key, task.generation));
}

#[tokio::test]
async fn test_schedule_cancel_sequences_keep_at_most_one_task() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    for round in 0..5 {
        scheduler.schedule(2, 1, Some(time(10, round))).unwrap();
        scheduler
            .reschedule_after_interval(2, 1, time(10, 0), RepeatInterval::Weekly)
            .unwrap();
        if round % 2 == 0 {
            assert!(scheduler.cancel(2, 1));
        }
        assert!(scheduler.len() <= 1);
    }
    assert_eq!(scheduler.len(), 0);

    scheduler.schedule(2, 1, Some(time(10, 0))).unwrap();
    scheduler.schedule(2, 2, Some(time(10, 0))).unwrap();
    assert_eq!(scheduler.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_task_never_fires() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(1, 3, Some(time(9, 30))).unwrap();
    assert!(scheduler.cancel(1, 3));
    assert!(!scheduler.cancel(1, 3));

    assert!(next_fire(&mut fired).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fire_replaced_before_claim_is_stale() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(1, 1, Some(time(9, 5))).unwrap();
    let task = next_fire(&mut fired).await.unwrap();

    // the user edits the notification while the fire sits in the queue
    scheduler.schedule(1, 1, Some(time(18, 0))).unwrap();

    assert!(!scheduler.claim(task.key, task.generation));
    assert_eq!(scheduler.fire_time(1, 1), Some(local(2024, 3, 10, 18, 0)));
}

#[tokio::test]
async fn test_interval_steps() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 12, 15, 10, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    let monthly = scheduler
        .reschedule_after_interval(1, 1, time(10, 0), RepeatInterval::Monthly)
        .unwrap();
    assert_eq!(monthly, local(2025, 1, 15, 10, 0));

    let weekly = scheduler
        .reschedule_after_interval(1, 2, time(10, 0), RepeatInterval::Weekly)
        .unwrap();
    assert_eq!(weekly, local(2024, 12, 22, 10, 0));

    let daily = scheduler
        .reschedule_after_interval(1, 3, time(10, 0), RepeatInterval::Daily)
        .unwrap();
    assert_eq!(daily, local(2024, 12, 16, 10, 0));

    assert_eq!(scheduler.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_daily_reschedule_steps_from_fire_date() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 23, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(1, 1, Some(time(23, 59))).unwrap();
    let task = next_fire(&mut fired).await.unwrap();

    // dispatch finishes after local midnight
    clock.set(local(2024, 3, 11, 0, 1));
    assert!(scheduler.claim(task.key, task.generation));
    let next = scheduler
        .complete(
            task.key,
            task.generation,
            Completion::Reschedule {
                time: time(23, 59),
                interval: RepeatInterval::Daily,
            },
        )
        .unwrap();

    assert_eq!(next, Some(local(2024, 3, 11, 23, 59)));
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_complete_after_cancel_registers_nothing() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(1, 1, Some(time(9, 1))).unwrap();
    let task = next_fire(&mut fired).await.unwrap();
    assert!(scheduler.claim(task.key, task.generation));
    assert!(scheduler.is_current(task.key, task.generation));

    assert!(scheduler.cancel(1, 1));
    assert!(!scheduler.is_current(task.key, task.generation));

    let next = scheduler
        .complete(
            task.key,
            task.generation,
            Completion::Reschedule {
                time: time(9, 1),
                interval: RepeatInterval::Daily,
            },
        )
        .unwrap();
    assert_eq!(next, None);
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_registers_same_key_later() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 9, 0));
    let (scheduler, mut fired) = scheduler(&store, &clock);

    scheduler.schedule(1, 1, Some(time(9, 1))).unwrap();
    let task = next_fire(&mut fired).await.unwrap();
    clock.set(task.fire_at);
    assert!(scheduler.claim(task.key, task.generation));

    let next = scheduler
        .complete(
            task.key,
            task.generation,
            Completion::RetryIn(std::time::Duration::from_secs(300)),
        )
        .unwrap();
    assert_eq!(next, Some(task.fire_at + Duration::minutes(5)));

    let retried = next_fire(&mut fired).await.unwrap();
    assert_eq!(retried.key, task.key);
    assert!(retried.generation > task.generation);
}

#[tokio::test]
async fn test_restore_replaces_registry_with_store_contents() {
    let store = MemoryStore::new();
    store.add_user(1);
    store.add_user(2);
    store.create(1, settings(8, 0, RepeatInterval::Daily)).await.unwrap();
    store.create(1, settings(9, 0, RepeatInterval::Once)).await.unwrap();
    store.create(2, settings(20, 0, RepeatInterval::Weekly)).await.unwrap();
    store
        .set_autosend(
            2,
            Some(AutosendSetting {
                time: time(21, 0),
                interval: RepeatInterval::Daily,
            }),
        )
        .await
        .unwrap();

    let clock = ManualClock::new(local(2024, 3, 10, 7, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    // leftovers that the store does not know about
    scheduler.schedule(1, 1, Some(time(8, 0))).unwrap();
    scheduler.schedule(1, 1, Some(time(8, 30))).unwrap();
    scheduler.schedule(9, 9, Some(time(12, 0))).unwrap();

    assert_eq!(scheduler.restore_all().await.unwrap(), 4);
    assert_eq!(scheduler.len(), 4);
    assert_eq!(scheduler.fire_time(1, 1), Some(local(2024, 3, 10, 8, 0)));
    assert_eq!(scheduler.fire_time(2, -1), Some(local(2024, 3, 10, 21, 0)));
    assert_eq!(scheduler.fire_time(9, 9), None);

    // a second restore changes nothing
    assert_eq!(scheduler.restore_all().await.unwrap(), 4);
    assert_eq!(scheduler.len(), 4);
}

#[tokio::test]
async fn test_restore_rolls_missed_time_to_tomorrow() {
    let store = MemoryStore::new();
    store.add_user(3);
    store.create(3, settings(7, 0, RepeatInterval::Once)).await.unwrap();
    store.create(3, settings(18, 0, RepeatInterval::Once)).await.unwrap();
    store.delete(3, 1).await.unwrap();

    let clock = ManualClock::new(local(2024, 3, 10, 19, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    assert_eq!(scheduler.restore_all().await.unwrap(), 1);
    assert_eq!(scheduler.fire_time(3, 2), Some(local(2024, 3, 11, 18, 0)));
}

#[tokio::test]
async fn test_restore_keeps_pending_weekly_fire() {
    let store = MemoryStore::new();
    store.add_user(1);
    store.create(1, settings(10, 0, RepeatInterval::Weekly)).await.unwrap();
    store.create(1, settings(10, 0, RepeatInterval::Monthly)).await.unwrap();
    store
        .set_next_fire_at(1, 1, Some(local(2024, 3, 15, 10, 0)))
        .await
        .unwrap();
    // pending instant missed while the process was down
    store
        .set_next_fire_at(1, 2, Some(local(2024, 3, 1, 10, 0)))
        .await
        .unwrap();

    let clock = ManualClock::new(local(2024, 3, 10, 12, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    scheduler.restore_all().await.unwrap();
    assert_eq!(scheduler.fire_time(1, 1), Some(local(2024, 3, 15, 10, 0)));
    assert_eq!(scheduler.fire_time(1, 2), Some(local(2024, 3, 11, 10, 0)));
}

#[tokio::test]
async fn test_restore_failure_keeps_registry() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 12, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);
    scheduler.schedule(1, 1, Some(time(13, 0))).unwrap();

    store.fail_reads(true);
    let err = tokio_test::assert_err!(scheduler.restore_all().await);
    assert!(matches!(err, SchedulerError::Store(_)));
    assert_eq!(scheduler.len(), 1);

    store.fail_reads(false);
    tokio_test::assert_ok!(scheduler.restore_all().await);
}

#[tokio::test]
async fn test_resume_prefers_pending_instant() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(local(2024, 3, 10, 12, 0));
    let (scheduler, _fired) = scheduler(&store, &clock);

    let pending = local(2024, 3, 20, 10, 0);
    assert_eq!(scheduler.resume(1, 1, time(10, 0), Some(pending)).unwrap(), pending);
    assert_eq!(
        scheduler.resume(1, 2, time(10, 0), None).unwrap(),
        local(2024, 3, 11, 10, 0)
    );
}
