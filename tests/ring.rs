#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use common::{edge_set, namespace, tagged};
use fas::{
    BufferError, EdgeSet, LocalRing, MAX_DATA, MAX_EDGES, Region, RingBuffer, Role, Semaphore,
    SetupError, SharedRing,
};
use indexmap::IndexSet;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn read_one<R: Region, S: Semaphore>(ring: &RingBuffer<R, S>) -> EdgeSet {
    let mut dest = EdgeSet::new().unwrap();
    ring.read(&mut dest).unwrap();
    dest
}

fn assert_round_trip<R: Region, S: Semaphore>(ring: &RingBuffer<R, S>) {
    let candidates: Vec<EdgeSet> = (0..MAX_DATA)
        .map(|i| tagged(i as u32, i % (MAX_EDGES + 1)))
        .collect();
    for candidate in &candidates {
        ring.write(candidate).unwrap();
    }
    assert_eq!(ring.free_slots().unwrap(), 0);
    assert_eq!(ring.filled_slots().unwrap(), MAX_DATA as u32);
    for candidate in &candidates {
        assert_eq!(&read_one(ring), candidate);
    }
    assert_eq!(ring.free_slots().unwrap(), MAX_DATA as u32);
    assert_eq!(ring.filled_slots().unwrap(), 0);
}

fn assert_slot_accounting<R: Region, S: Semaphore>(ring: &RingBuffer<R, S>) {
    // Enough rounds to wrap both cursors several times.
    for round in 0..5 * MAX_DATA {
        let candidate = tagged(round as u32, round % MAX_EDGES);
        ring.write(&candidate).unwrap();
        if round % 3 == 0 {
            ring.write(&candidate).unwrap();
            assert_eq!(read_one(ring), candidate);
        }
        let total = ring.free_slots().unwrap() + ring.filled_slots().unwrap();
        assert_eq!(total, MAX_DATA as u32);
        assert_eq!(read_one(ring), candidate);
        let total = ring.free_slots().unwrap() + ring.filled_slots().unwrap();
        assert_eq!(total, MAX_DATA as u32);
    }
}

/// `producers` threads each write `per_producer` distinct candidates while the
/// calling thread reads all of them.
fn assert_concurrent_producers<R, S>(
    consumer: &RingBuffer<R, S>,
    producers: Vec<RingBuffer<R, S>>,
    per_producer: usize,
) where
    R: Region + Send + Sync,
    S: Semaphore + Send + Sync,
{
    let total = producers.len() * per_producer;
    let produced: IndexSet<Vec<fas::Edge>> = (0..producers.len())
        .flat_map(|p| (0..per_producer).map(move |i| candidate_of(p, i).edges().to_vec()))
        .collect();
    assert_eq!(produced.len(), total);

    let consumed = thread::scope(|scope| {
        for (p, producer) in producers.iter().enumerate() {
            scope.spawn(move || {
                for i in 0..per_producer {
                    producer.write(&candidate_of(p, i)).unwrap();
                }
            });
        }
        (0..total).map(|_| read_one(consumer)).collect::<Vec<_>>()
    });

    let mut seen = IndexSet::new();
    let mut last_seq = vec![None; producers.len()];
    for candidate in &consumed {
        let index = produced
            .get_index_of(candidate.edges())
            .expect("consumed candidate was never produced");
        assert!(seen.insert(index), "candidate consumed twice");
        let (p, i) = (index / per_producer, index % per_producer);
        // A single producer's candidates arrive in the order it wrote them.
        assert!(last_seq[p].is_none_or(|last| last < i));
        last_seq[p] = Some(i);
    }
    assert_eq!(seen.len(), total);
    assert_eq!(consumer.filled_slots().unwrap(), 0);
    assert_eq!(consumer.free_slots().unwrap(), MAX_DATA as u32);
}

fn candidate_of(producer: usize, seq: usize) -> EdgeSet {
    let len = 1 + seq % MAX_EDGES;
    let edges: Vec<(u32, u32)> = (0..len)
        .map(|k| (producer as u32, (seq * MAX_EDGES + k) as u32))
        .collect();
    edge_set(&edges)
}

#[test]
fn local_round_trip_preserves_order() {
    assert_round_trip(&LocalRing::local());
}

#[test]
fn local_slot_accounting_stays_balanced() {
    assert_slot_accounting(&LocalRing::local());
}

#[test]
fn local_concurrent_producers_lose_and_duplicate_nothing() {
    let ring = LocalRing::local();
    let producers = (0..4).map(|_| ring.worker_handle()).collect();
    assert_concurrent_producers(&ring, producers, 2_000);
}

#[test]
fn oversized_candidates_are_rejected_without_side_effects() {
    let ring = LocalRing::local();
    let err = ring.write(&tagged(0, MAX_EDGES + 1)).unwrap_err();
    assert_eq!(err, BufferError::Oversized { len: MAX_EDGES + 1 });
    assert_eq!(ring.free_slots().unwrap(), MAX_DATA as u32);
    assert_eq!(ring.filled_slots().unwrap(), 0);
    ring.write(&tagged(0, MAX_EDGES)).unwrap();
    assert_eq!(read_one(&ring).len(), MAX_EDGES);
}

#[test]
fn workers_cannot_read() {
    let ring = LocalRing::local();
    let worker = ring.worker_handle();
    assert_eq!(worker.role(), Role::Worker);
    worker.write(&tagged(1, 1)).unwrap();
    let mut dest = EdgeSet::new().unwrap();
    assert_eq!(worker.read(&mut dest), Err(BufferError::NotCoordinator));
    assert_eq!(worker.try_read(&mut dest), Err(BufferError::NotCoordinator));
    assert_eq!(read_one(&ring), tagged(1, 1));
}

#[test]
fn try_read_does_not_block_on_empty_ring() {
    let ring = LocalRing::local();
    let mut dest = EdgeSet::new().unwrap();
    assert!(!ring.try_read(&mut dest).unwrap());
    ring.write(&tagged(2, 3)).unwrap();
    assert!(ring.try_read(&mut dest).unwrap());
    assert_eq!(dest, tagged(2, 3));
}

fn assert_read_timeout<R: Region, S: Semaphore>(ring: &RingBuffer<R, S>) {
    let mut dest = EdgeSet::new().unwrap();
    let started = Instant::now();
    assert!(!ring.read_timeout(&mut dest, Duration::from_millis(30)).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert!(dest.is_empty());
    ring.write(&tagged(4, 2)).unwrap();
    assert!(ring.read_timeout(&mut dest, Duration::from_secs(5)).unwrap());
    assert_eq!(dest, tagged(4, 2));
    assert_eq!(ring.free_slots().unwrap() as usize, MAX_DATA);
}

#[test]
fn local_read_timeout_gives_up_on_empty_ring() {
    assert_read_timeout(&LocalRing::local());
}

#[test]
fn shared_read_timeout_gives_up_on_empty_ring() {
    let (_, ns) = namespace("timeout");
    let ring = SharedRing::create(&ns).unwrap();
    assert_read_timeout(&ring);
    ring.teardown().unwrap();
}

#[test]
fn read_appends_to_destination() {
    let ring = LocalRing::local();
    ring.write(&edge_set(&[(5, 6)])).unwrap();
    let mut dest = edge_set(&[(1, 2)]);
    ring.read(&mut dest).unwrap();
    assert_eq!(dest, edge_set(&[(1, 2), (5, 6)]));
}

#[test]
fn termination_flag_is_shared_by_all_handles() {
    let ring = LocalRing::local();
    let worker = ring.worker_handle();
    assert!(!worker.is_terminated());
    ring.terminate();
    assert!(worker.is_terminated());
    assert!(ring.is_terminated());
}

#[test]
fn reader_blocks_until_a_slot_is_filled() {
    let ring = LocalRing::local();
    let worker = ring.worker_handle();
    let reader = thread::spawn(move || read_one(&ring));
    thread::sleep(Duration::from_millis(50));
    worker.write(&tagged(9, 2)).unwrap();
    assert_eq!(reader.join().unwrap(), tagged(9, 2));
}

#[test]
fn shared_round_trip_preserves_order() {
    let (_, ns) = namespace("round_trip");
    let ring = SharedRing::create(&ns).unwrap();
    assert_round_trip(&ring);
    ring.teardown().unwrap();
}

#[test]
fn shared_slot_accounting_stays_balanced() {
    let (_, ns) = namespace("accounting");
    let ring = SharedRing::create(&ns).unwrap();
    assert_slot_accounting(&ring);
    ring.teardown().unwrap();
}

#[test]
fn shared_concurrent_producers_through_separate_mappings() {
    let (_, ns) = namespace("concurrent");
    let ring = SharedRing::create(&ns).unwrap();
    let producers = (0..4).map(|_| SharedRing::attach(&ns).unwrap()).collect();
    assert_concurrent_producers(&ring, producers, 1_000);
    ring.teardown().unwrap();
}

#[test]
fn worker_sees_coordinator_writes_and_flag_through_its_own_mapping() {
    let (_, ns) = namespace("mapping");
    let ring = SharedRing::create(&ns).unwrap();
    let worker = SharedRing::attach(&ns).unwrap();
    worker.write(&edge_set(&[(3, 4), (4, 5)])).unwrap();
    assert_eq!(read_one(&ring), edge_set(&[(3, 4), (4, 5)]));
    ring.terminate();
    assert!(worker.is_terminated());
    worker.teardown().unwrap();
    ring.teardown().unwrap();
}

#[test]
fn attach_fails_without_coordinator() {
    let (_, ns) = namespace("absent");
    assert!(matches!(
        SharedRing::attach(&ns),
        Err(SetupError::OpenSegment { .. })
    ));
}

#[test]
fn second_coordinator_is_refused_and_leaves_the_first_intact() {
    let (_, ns) = namespace("twice");
    let ring = SharedRing::create(&ns).unwrap();
    ring.write(&tagged(4, 4)).unwrap();
    assert!(matches!(
        SharedRing::create(&ns),
        Err(SetupError::OpenSegment { .. })
    ));
    assert_eq!(read_one(&ring), tagged(4, 4));
    let worker = SharedRing::attach(&ns).unwrap();
    drop(worker);
    ring.teardown().unwrap();
}

#[test]
fn worker_teardown_keeps_names_and_coordinator_teardown_removes_them() {
    let (_, ns) = namespace("teardown");
    let ring = SharedRing::create(&ns).unwrap();
    SharedRing::attach(&ns).unwrap().teardown().unwrap();
    SharedRing::attach(&ns).unwrap().teardown().unwrap();
    ring.teardown().unwrap();
    assert!(SharedRing::attach(&ns).is_err());
    // The names are free again.
    SharedRing::create(&ns).unwrap().teardown().unwrap();
}

#[test]
fn dropping_a_coordinator_removes_its_names() {
    let (_, ns) = namespace("drop");
    drop(SharedRing::create(&ns).unwrap());
    assert!(SharedRing::attach(&ns).is_err());
}

#[test]
fn failed_setup_unwinds_everything_it_created() {
    let (prefix, ns) = namespace("unwind");
    let name = |suffix: &str| std::ffi::CString::new(format!("/{prefix}_{suffix}")).unwrap();
    let stale = name("sem_used");
    // SAFETY: Plain FFI calls with NUL terminated names.
    let sem = unsafe { libc::sem_open(stale.as_ptr(), libc::O_CREAT | libc::O_EXCL, 0o600, 0) };
    assert_ne!(sem, libc::SEM_FAILED);

    let err = SharedRing::create(&ns).unwrap_err();
    assert!(matches!(err, SetupError::OpenSemaphore { ref name, .. } if name.ends_with("_sem_used")));

    // Segment and free-slot semaphore were created and must be gone again.
    assert!(matches!(
        SharedRing::attach(&ns),
        Err(SetupError::OpenSegment { .. })
    ));
    let free = name("sem_free");
    // SAFETY: See above.
    let reopened = unsafe { libc::sem_open(free.as_ptr(), 0) };
    assert_eq!(reopened, libc::SEM_FAILED);

    // The semaphore this process did not create is left alone.
    // SAFETY: See above.
    unsafe {
        assert_eq!(libc::sem_close(sem), 0);
        assert_eq!(libc::sem_unlink(stale.as_ptr()), 0);
    }
    SharedRing::create(&ns).unwrap().teardown().unwrap();
}

#[test]
fn shared_handles_can_be_moved_across_threads() {
    let (_, ns) = namespace("threads");
    let ring = Arc::new(SharedRing::create(&ns).unwrap());
    let writer = {
        let ns = ns.clone();
        thread::spawn(move || {
            let worker = SharedRing::attach(&ns).unwrap();
            worker.write(&tagged(8, 8)).unwrap();
        })
    };
    let reader = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || read_one(&ring))
    };
    writer.join().unwrap();
    assert_eq!(reader.join().unwrap(), tagged(8, 8));
    Arc::into_inner(ring).unwrap().teardown().unwrap();
}
