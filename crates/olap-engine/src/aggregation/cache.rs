//! Process-wide segment cache shared by every query of a session.
//!
//! Each segment key has a slot. The first thread to ask for a missing key owns its
//! computation; later threads wait on the slot's condition variable in short slices so they
//! can notice cancellation. A failed computation removes the slot before waking waiters, so
//! a retry starts a fresh computation.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use olap_model::{CubeId, MeasureId, Value};

use crate::aggregation::request::{CellRequest, Levels};
use crate::aggregation::segment::{Segment, SegmentKey};
use crate::cancel::ExecutionHandle;
use crate::error::{OlapError, OlapResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    #[default]
    NoEviction,
    /// Keep at most this many segments, dropping the oldest first.
    MaxSegments(usize),
}

enum SlotState {
    Computing,
    Ready(Arc<Segment>),
    Failed(String),
}

struct Slot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Slot {
    fn computing() -> Self {
        Self {
            state: Mutex::new(SlotState::Computing),
            changed: Condvar::new(),
        }
    }
}

type IndexKey = (CubeId, MeasureId, Levels);

pub struct SegmentCache {
    slots: DashMap<SegmentKey, Arc<Slot>>,
    /// Completed segments by measure and grouping levels.
    index: DashMap<IndexKey, Vec<Arc<Segment>>>,
    /// Completion order, oldest first.
    order: Mutex<VecDeque<SegmentKey>>,
    eviction: EvictionPolicy,
    wait_slice: Duration,
}

impl SegmentCache {
    pub fn new(eviction: EvictionPolicy, wait_slice: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            index: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            eviction,
            wait_slice,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.index.iter().map(|entry| entry.value().len()).sum()
    }

    /// Value of a cell held by a completed segment.
    pub fn lookup(&self, request: &CellRequest) -> Option<Value> {
        let key = (request.cube, request.measure, request.levels());
        let segments = self.index.get(&key)?;
        segments.iter().find_map(|segment| segment.get(request))
    }

    /// Completed segment covering `request`.
    pub fn segment_for(&self, request: &CellRequest) -> Option<Arc<Segment>> {
        let key = (request.cube, request.measure, request.levels());
        let segments = self.index.get(&key)?;
        segments
            .iter()
            .find(|segment| segment.key.covers(request))
            .cloned()
    }

    /// Return the segment for `key`, computing it with `compute` unless another thread
    /// already is, in which case wait for that thread's result.
    pub fn get_or_compute(
        &self,
        key: &SegmentKey,
        handle: &ExecutionHandle,
        compute: impl FnOnce() -> OlapResult<Segment>,
    ) -> OlapResult<Arc<Segment>> {
        let (slot, owner) = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot::computing());
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        };
        if !owner {
            return self.wait(&slot, handle);
        }

        let mut guard = ComputeGuard {
            cache: self,
            key,
            slot: &slot,
            outcome: None,
        };
        match compute() {
            Ok(segment) => {
                let segment = Arc::new(segment);
                self.publish(key, &segment);
                guard.outcome = Some(SlotState::Ready(Arc::clone(&segment)));
                Ok(segment)
            }
            Err(err) => {
                guard.outcome = Some(SlotState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    fn wait(&self, slot: &Slot, handle: &ExecutionHandle) -> OlapResult<Arc<Segment>> {
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                SlotState::Ready(segment) => return Ok(Arc::clone(segment)),
                SlotState::Failed(message) => {
                    return Err(OlapError::CacheComputationFailed {
                        message: message.clone(),
                        retryable: true,
                    })
                }
                SlotState::Computing => {}
            }
            handle.check()?;
            let (next, _) = slot
                .changed
                .wait_timeout(state, self.wait_slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn publish(&self, key: &SegmentKey, segment: &Arc<Segment>) {
        self.index
            .entry((key.cube, key.measure, key.levels.clone()))
            .or_default()
            .push(Arc::clone(segment));
        let evicted: Vec<SegmentKey> = {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            order.push_back(key.clone());
            match self.eviction {
                EvictionPolicy::NoEviction => Vec::new(),
                EvictionPolicy::MaxSegments(max) => {
                    let excess = order.len().saturating_sub(max);
                    order.drain(..excess).collect()
                }
            }
        };
        for key in evicted {
            log::debug!("evicting segment {:?} of {}", key.levels, key.measure);
            self.remove(&key);
        }
    }

    fn remove(&self, key: &SegmentKey) {
        self.slots.remove(key);
        let index_key = (key.cube, key.measure, key.levels.clone());
        if let Some(mut segments) = self.index.get_mut(&index_key) {
            segments.retain(|s| &s.key != key);
        }
        self.index.remove_if(&index_key, |_, segments| segments.is_empty());
    }

    /// Drop every segment of `cube`.
    pub fn flush(&self, cube: CubeId) {
        let keys: Vec<SegmentKey> = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|key| key.cube == cube)
            .cloned()
            .collect();
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| key.cube != cube);
        for key in keys {
            self.remove(&key);
        }
    }
}

/// Settles a slot when its computation ends, however it ends.
struct ComputeGuard<'a> {
    cache: &'a SegmentCache,
    key: &'a SegmentKey,
    slot: &'a Arc<Slot>,
    outcome: Option<SlotState>,
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| SlotState::Failed("segment computation was abandoned".into()));
        if matches!(outcome, SlotState::Failed(_)) {
            self.cache
                .slots
                .remove_if(self.key, |_, slot| Arc::ptr_eq(slot, self.slot));
        }
        *self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = outcome;
        self.slot.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::LevelId;
    use smallvec::smallvec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use crate::aggregation::segment::SegmentAxis;

    fn key(year: i32) -> SegmentKey {
        SegmentKey {
            cube: CubeId(0),
            measure: MeasureId(0),
            levels: smallvec![LevelId(1)],
            axes: vec![SegmentAxis::Column {
                level: LevelId(1),
                values: vec![Value::from(year)],
            }],
        }
    }

    fn request(year: i32) -> CellRequest {
        CellRequest {
            cube: CubeId(0),
            measure: MeasureId(0),
            constraints: smallvec![(LevelId(1), Value::from(year))],
        }
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = SegmentCache::new(EvictionPolicy::NoEviction, Duration::from_millis(5));
        let computations = AtomicUsize::new(0);
        let barrier = Barrier::new(4);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    barrier.wait();
                    let handle = ExecutionHandle::new();
                    let segment = cache
                        .get_or_compute(&key(1997), &handle, || {
                            computations.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(30));
                            let mut segment = Segment::new(key(1997));
                            segment.insert(vec![Value::from(1997)], Value::from(5));
                            Ok(segment)
                        })
                        .unwrap();
                    assert_eq!(segment.len(), 1);
                });
            }
        });
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lookup(&request(1997)), Some(Value::from(5)));
    }

    #[test]
    fn failure_is_not_cached() {
        let cache = SegmentCache::new(EvictionPolicy::NoEviction, Duration::from_millis(5));
        let handle = ExecutionHandle::new();
        let err = cache
            .get_or_compute(&key(1997), &handle, || Err(OlapError::eval("backend down")))
            .unwrap_err();
        assert_eq!(err, OlapError::eval("backend down"));
        let segment = cache
            .get_or_compute(&key(1997), &handle, || Ok(Segment::new(key(1997))))
            .unwrap();
        assert!(segment.is_empty());
        assert_eq!(cache.lookup(&request(1997)), Some(Value::Null));
    }

    #[test]
    fn waiters_see_the_owner_fail() {
        let cache = SegmentCache::new(EvictionPolicy::NoEviction, Duration::from_millis(5));
        let started = Barrier::new(4);
        let waiting = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let err = cache
                    .get_or_compute(&key(1997), &ExecutionHandle::new(), || {
                        started.wait();
                        while waiting.load(Ordering::SeqCst) < 3 {
                            std::thread::yield_now();
                        }
                        std::thread::sleep(Duration::from_millis(30));
                        Err(OlapError::eval("backend down"))
                    })
                    .unwrap_err();
                assert_eq!(err, OlapError::eval("backend down"));
            });
            for _ in 0..3 {
                scope.spawn(|| {
                    started.wait();
                    waiting.fetch_add(1, Ordering::SeqCst);
                    let err = cache
                        .get_or_compute(&key(1997), &ExecutionHandle::new(), || {
                            unreachable!("owner is computing")
                        })
                        .unwrap_err();
                    assert!(
                        matches!(
                            err,
                            OlapError::CacheComputationFailed {
                                retryable: true,
                                ..
                            }
                        ),
                        "{err:?}"
                    );
                    assert!(err.to_string().contains("backend down"), "{err}");
                });
            }
        });

        let segment = cache
            .get_or_compute(&key(1997), &ExecutionHandle::new(), || {
                let mut segment = Segment::new(key(1997));
                segment.insert(vec![Value::from(1997)], Value::from(5));
                Ok(segment)
            })
            .unwrap();
        assert_eq!(segment.len(), 1);
        assert_eq!(cache.lookup(&request(1997)), Some(Value::from(5)));
    }

    #[test]
    fn oldest_segments_are_evicted_first() {
        let cache = SegmentCache::new(EvictionPolicy::MaxSegments(1), Duration::from_millis(5));
        let handle = ExecutionHandle::new();
        for year in [1997, 1998] {
            cache
                .get_or_compute(&key(year), &handle, || Ok(Segment::new(key(year))))
                .unwrap();
        }
        assert_eq!(cache.segment_count(), 1);
        assert_eq!(cache.lookup(&request(1997)), None);
        assert_eq!(cache.lookup(&request(1998)), Some(Value::Null));
        cache.flush(CubeId(0));
        assert_eq!(cache.segment_count(), 0);
    }

    #[test]
    fn cancelled_waiter_gives_up() {
        let cache = SegmentCache::new(EvictionPolicy::NoEviction, Duration::from_millis(5));
        let started = Barrier::new(2);
        let waiter = ExecutionHandle::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                cache
                    .get_or_compute(&key(1997), &ExecutionHandle::new(), || {
                        started.wait();
                        std::thread::sleep(Duration::from_millis(200));
                        Ok(Segment::new(key(1997)))
                    })
                    .unwrap();
            });
            started.wait();
            waiter.cancel();
            let err = cache
                .get_or_compute(&key(1997), &waiter, || unreachable!("owner is computing"))
                .unwrap_err();
            assert_eq!(err, OlapError::QueryCancelled);
        });
    }
}
