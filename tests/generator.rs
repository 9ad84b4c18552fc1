mod common;

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use txgen::buf::Buf;
use txgen::buf_mmap::BufMmap;
use txgen::buf_pool::BufPool;
use txgen::buf_pool_vec::BufPoolVec;
use txgen::buf_vec::BufVec;
use txgen::generator::{Generator, GeneratorConfig, RunState, Step};
use txgen::mmap_area::{MmapArea, MmapAreaOptions};
use txgen::packet::PacketTemplate;
use txgen::shutdown::Shutdown;

use common::{drain_ids, pool_of, unpaced, Reject, SimQueue, BUF_SIZE};

fn expected_frame(template: &PacketTemplate) -> Vec<u8> {
    let mut b = BufVec::new(0, BUF_SIZE);
    let n = template.write(&mut b);

    b.get_data()[..n].to_vec()
}

#[test]
fn sends_count_packets_then_stops() {
    const N: usize = 16;
    const M: u64 = 10;

    let template = PacketTemplate::default();
    let expected = expected_frame(&template);

    let mut gen = Generator::new(pool_of(N), SimQueue::new(256), template, unpaced(M));
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, M);
    assert_eq!(stats.tx_rejected, 0);
    assert_eq!(gen.state(), RunState::Stopping);

    // Without completions the sent frames stay with the queue
    assert_eq!(gen.pool().len(), N - M as usize);
    assert_eq!(gen.engine().in_flight(), M as usize);

    let q = gen.engine().queue();
    assert_eq!(q.accepted_ids.len(), M as usize);
    for buf in q.ring() {
        assert_eq!(buf.get_len() as usize, expected.len());
        assert_eq!(buf.get_total_len() as usize, expected.len());
        assert_eq!(&buf.get_data()[..expected.len()], &expected[..]);
    }
}

#[test]
fn completed_frames_are_recycled() {
    const N: usize = 4;

    let mut gen = Generator::new(
        pool_of(N),
        SimQueue::completing(256),
        PacketTemplate::default(),
        unpaced(100),
    );
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, 100);
    assert_eq!(stats.pool_empty, 0);
    assert!(stats.completed >= 96);
    assert_eq!(gen.pool().len() + gen.engine().in_flight(), N);
}

#[test]
fn rejected_frames_return_to_pool() {
    const N: usize = 8;

    let q = SimQueue::rejecting(256, Reject::Always);
    let mut gen = Generator::new(pool_of(N), q, PacketTemplate::default(), unpaced(10));
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, 0);
    assert_eq!(stats.tx_rejected, 10);
    assert_eq!(gen.pool().len(), N);
    assert_eq!(gen.engine().in_flight(), 0);
    assert!(gen.engine().queue().accepted_ids.is_empty());
}

#[test]
fn queue_error_counts_as_rejection() {
    let q = SimQueue::rejecting(256, Reject::Fail);
    let mut gen = Generator::new(pool_of(2), q, PacketTemplate::default(), unpaced(3));

    let s = Shutdown::new();
    assert_eq!(gen.step(&s), Step::Rejected);

    let stats = gen.run(&s);
    assert_eq!(stats.tx_rejected, 3);
    assert_eq!(gen.pool().len(), 2);
}

#[test]
fn every_buffer_accounted_once() {
    const N: usize = 16;

    let q = SimQueue::rejecting(256, Reject::EveryNth(2));
    let mut gen = Generator::new(pool_of(N), q, PacketTemplate::default(), unpaced(10));
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, 5);
    assert_eq!(stats.tx_rejected, 5);
    assert_eq!(gen.pool().len(), N - 5);

    let mut ids: Vec<usize> = gen.engine().queue().ring().map(|b| b.get_id()).collect();
    ids.extend(drain_ids(gen.pool_mut()));

    // Each id is either with the queue or at rest, never both, never lost
    let unique: HashSet<usize> = ids.iter().cloned().collect();
    assert_eq!(ids.len(), N);
    assert_eq!(unique, (0..N).collect::<HashSet<_>>());
}

#[test]
fn exhausted_pool_backs_off_then_recovers() {
    const N: usize = 3;

    let mut gen = Generator::new(
        pool_of(N),
        SimQueue::new(256),
        PacketTemplate::default(),
        GeneratorConfig::default(),
    );
    let s = Shutdown::new();

    for _ in 0..N {
        assert_eq!(gen.step(&s), Step::Sent);
    }
    assert_eq!(gen.step(&s), Step::PoolEmpty);
    assert_eq!(gen.step(&s), Step::PoolEmpty);
    assert_eq!(gen.stats().pool_empty, 2);
    assert_eq!(gen.stats().attempts(), N as u64);

    gen.engine_mut().queue_mut().completions = true;
    assert_eq!(gen.step(&s), Step::Sent);
    assert_eq!(gen.stats().completed, N as u64);
    assert_eq!(gen.stats().tx_packets, N as u64 + 1);
}

#[test]
fn pool_conserved_at_every_step() {
    const N: usize = 6;

    let q = SimQueue::rejecting(3, Reject::EveryNth(3));
    let mut gen = Generator::new(
        pool_of(N),
        q,
        PacketTemplate::default(),
        GeneratorConfig::default(),
    );
    let s = Shutdown::new();

    for i in 0..40 {
        if i == 20 {
            // Ring has been full since early on; let it drain from here
            assert_eq!(gen.engine().queue().ring_len(), 3);
            gen.engine_mut().queue_mut().completions = true;
        }

        let step = gen.step(&s);
        assert_ne!(step, Step::Stopped);

        let in_flight = gen.engine().in_flight();
        assert_eq!(gen.pool().len() + in_flight, N, "step {} ({:?})", i, step);
        assert_eq!(in_flight, gen.engine().queue().ring_len(), "step {}", i);
    }

    let stats = gen.stats();
    assert!(stats.tx_rejected > 0);
    assert!(stats.completed > 0);
    assert_eq!(stats.pool_empty, 0);
}

#[test]
fn stop_interrupts_empty_pool_backoff() {
    let config = GeneratorConfig {
        interval: Duration::from_millis(0),
        empty_backoff: Duration::from_secs(10),
        count: None,
    };
    let mut gen = Generator::new(
        pool_of(1),
        SimQueue::new(256),
        PacketTemplate::default(),
        config,
    );

    let s = Shutdown::new();
    let remote = s.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request();
    });

    let start = Instant::now();
    let stats = gen.run(&s);

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(stats.tx_packets, 1);
    assert!(stats.pool_empty >= 1);
    assert_eq!(gen.state(), RunState::Stopping);

    handle.join().unwrap();
}

#[test]
fn full_ring_rejects() {
    const N: usize = 8;

    let mut gen = Generator::new(
        pool_of(N),
        SimQueue::new(2),
        PacketTemplate::default(),
        unpaced(5),
    );
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, 2);
    assert_eq!(stats.tx_rejected, 3);
    assert_eq!(gen.pool().len(), N - 2);
}

#[test]
fn stop_before_start_sends_nothing() {
    const N: usize = 4;

    let s = Shutdown::new();
    s.request();

    let mut gen = Generator::new(
        pool_of(N),
        SimQueue::new(256),
        PacketTemplate::default(),
        GeneratorConfig::default(),
    );
    let stats = gen.run(&s);

    assert_eq!(stats.attempts(), 0);
    assert_eq!(gen.pool().len(), N);
    assert_eq!(gen.engine().queue().submissions, 0);
    assert_eq!(gen.step(&s), Step::Stopped);
}

#[test]
fn stop_interrupts_pacing() {
    let config = GeneratorConfig {
        interval: Duration::from_secs(10),
        ..Default::default()
    };
    let mut gen = Generator::new(
        pool_of(4),
        SimQueue::new(256),
        PacketTemplate::default(),
        config,
    );

    let s = Shutdown::new();
    let remote = s.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request();
    });

    let start = Instant::now();
    let stats = gen.run(&s);

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.tx_packets, 1);
    assert_eq!(gen.state(), RunState::Stopping);

    handle.join().unwrap();
}

#[test]
fn mmap_frames() {
    const N: usize = 8;

    let (_area, mut bufs) = MmapArea::new(N, BUF_SIZE, MmapAreaOptions::default()).unwrap();
    let mut pool: BufPoolVec<BufMmap> = BufPoolVec::new(N);
    assert_eq!(pool.put(&mut bufs, N), N);

    let template = PacketTemplate::default();
    let expected = expected_frame(&template);

    let mut gen = Generator::new(pool, SimQueue::completing(256), template, unpaced(20));
    let stats = gen.run(&Shutdown::new());

    assert_eq!(stats.tx_packets, 20);
    assert_eq!(gen.pool().len() + gen.engine().in_flight(), N);

    for buf in gen.engine().queue().ring() {
        assert_eq!(&buf.get_data()[..expected.len()], &expected[..]);
    }
}
