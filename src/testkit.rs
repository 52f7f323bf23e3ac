//! In-memory collaborator mocks for tests, built on `ringbuf` the same
//! way sibling crate `bass-aes67` backs its producer/hot-consumer audio
//! path — here standing in for a NIC's RX/TX hardware queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::PtpError;
use crate::ports::{Buffer, BufferPool, ClockSource, FlowPattern, FlowSteering, RuleHandle, RxDescriptor, RxPort};

/// Handle used by a test to push frames that [`MockRxPort`] will later
/// hand back from `poll`.
pub struct MockRxFeed {
    producer: HeapProd<Vec<u8>>,
}

impl MockRxFeed {
    pub fn push(&mut self, frame: Vec<u8>) {
        let _ = self.producer.try_push(frame);
    }
}

/// Mock [`RxPort`] backed by a lock-free SPSC ring buffer.
pub struct MockRxPort {
    consumer: HeapCons<Vec<u8>>,
    scratch: Vec<Vec<u8>>,
}

impl MockRxPort {
    /// Create a connected feed/port pair with room for `capacity` frames.
    pub fn new(capacity: usize) -> (MockRxFeed, Self) {
        let rb = HeapRb::<Vec<u8>>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        (
            MockRxFeed { producer },
            Self {
                consumer,
                scratch: Vec::new(),
            },
        )
    }
}

impl RxPort for MockRxPort {
    fn poll(&mut self, max_frames: usize, out: &mut Vec<RxDescriptor<'_>>) {
        self.scratch.clear();
        for _ in 0..max_frames {
            match self.consumer.try_pop() {
                Some(frame) => self.scratch.push(frame),
                None => break,
            }
        }
        for frame in &self.scratch {
            out.push(RxDescriptor {
                data: frame,
                timestamp_ns: None,
            });
        }
    }
}

/// Handle used by a test to drain frames [`MockTxPort`] accepted.
pub struct MockTxSink {
    consumer: HeapCons<Vec<u8>>,
}

impl MockTxSink {
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.consumer.try_pop()).collect()
    }
}

/// Mock [`TxPort`]. Can be configured to always fail, modeling a full
/// hardware queue for TX-failure-counter tests.
pub struct MockTxPort {
    producer: HeapProd<Vec<u8>>,
    always_fail: bool,
}

impl MockTxPort {
    pub fn new(capacity: usize) -> (Self, MockTxSink) {
        let rb = HeapRb::<Vec<u8>>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        (
            Self {
                producer,
                always_fail: false,
            },
            MockTxSink { consumer },
        )
    }

    pub fn always_failing(capacity: usize) -> (Self, MockTxSink) {
        let (mut port, sink) = Self::new(capacity);
        port.always_fail = true;
        (port, sink)
    }
}

impl crate::ports::TxPort for MockTxPort {
    fn send(&mut self, frame: &[u8]) -> Result<(), PtpError> {
        if self.always_fail {
            return Err(PtpError::TxFailed(0, 0));
        }
        self.producer
            .try_push(frame.to_vec())
            .map_err(|_| PtpError::TxFailed(0, 0))
    }
}

/// Mock clock pair: independent wall and monotonic atomic nanosecond
/// counters a test advances explicitly. `advance`/`set` move both in
/// lockstep for the common case; `step_wall_only` exists so a test can
/// demonstrate that a wall-clock jump alone never perturbs FSM pacing
/// (spec.md §3/§4.6's clock-domain separation).
#[derive(Default)]
pub struct MockClock {
    wall_ns: AtomicI64,
    monotonic_ns: AtomicI64,
}

impl MockClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            wall_ns: AtomicI64::new(start_ns),
            monotonic_ns: AtomicI64::new(start_ns),
        }
    }

    pub fn advance(&self, delta_ns: i64) {
        self.wall_ns.fetch_add(delta_ns, Ordering::Relaxed);
        self.monotonic_ns.fetch_add(delta_ns, Ordering::Relaxed);
    }

    pub fn set(&self, now_ns: i64) {
        self.wall_ns.store(now_ns, Ordering::Relaxed);
        self.monotonic_ns.store(now_ns, Ordering::Relaxed);
    }

    /// Step only the wall clock, leaving the monotonic tick untouched.
    pub fn step_wall_only(&self, delta_ns: i64) {
        self.wall_ns.fetch_add(delta_ns, Ordering::Relaxed);
    }
}

impl ClockSource for MockClock {
    fn now_wall_ns(&self) -> i64 {
        self.wall_ns.load(Ordering::Relaxed)
    }

    fn now_monotonic_ns(&self) -> i64 {
        self.monotonic_ns.load(Ordering::Relaxed)
    }
}

/// Trivial heap-backed [`BufferPool`].
pub struct FixedBufferPool;

impl BufferPool for FixedBufferPool {
    fn acquire(&self, len: usize) -> Buffer {
        Buffer {
            data: vec![0u8; len],
        }
    }
}

/// Mock [`FlowSteering`] whose per-port, per-candidate-index
/// acceptance is scripted ahead of time — used to exercise the
/// cascade fallback and full-exhaustion paths end to end.
#[derive(Default)]
pub struct MockFlowSteering {
    reject: HashMap<(u8, FlowPattern), ()>,
    next_handle: u64,
    installed: Vec<(u8, FlowPattern)>,
    torn_down: Vec<(u8, RuleHandle)>,
}

impl MockFlowSteering {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Default::default()
        }
    }

    /// Mark `pattern` as rejected on `port_id`.
    pub fn reject(&mut self, port_id: u8, pattern: FlowPattern) -> &mut Self {
        self.reject.insert((port_id, pattern), ());
        self
    }

    pub fn installed(&self) -> &[(u8, FlowPattern)] {
        &self.installed
    }

    pub fn torn_down(&self) -> &[(u8, RuleHandle)] {
        &self.torn_down
    }
}

impl FlowSteering for MockFlowSteering {
    fn install(&mut self, port_id: u8, pattern: FlowPattern) -> Result<RuleHandle, PtpError> {
        if self.reject.contains_key(&(port_id, pattern)) {
            return Err(PtpError::FlowRuleFailed);
        }
        let handle = RuleHandle(self.next_handle);
        self.next_handle += 1;
        self.installed.push((port_id, pattern));
        Ok(handle)
    }

    fn teardown(&mut self, port_id: u8, handle: RuleHandle) {
        self.torn_down.push((port_id, handle));
    }
}
