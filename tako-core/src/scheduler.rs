//! Scheduler: assigns proof requests to the least-busy accelerator.
//!
//! Every device carries an atomic in-flight task counter, and a global counter
//! tracks all in-flight requests. Counters only move through a
//! [`ScheduleToken`]: reserving increments both, dropping the token decrements
//! both, so every exit path of a request releases exactly once.
//!
//! Selection never waits: when every device is busy the request still goes to
//! the least-loaded one. Optionally, a semaphore sized
//! `devices x max_tasks_per_device` bounds admission before selection.
//!
//! Ties are broken by registration order: the first device with the minimum
//! counter wins. Selection is a snapshot, so two concurrent requests may both
//! pick the same device; both still run there.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::devices::DeviceHandle;
use crate::types::ProveError;

struct DeviceSlot {
    handle: DeviceHandle,
    tasks: AtomicI32,
}

/// The device scheduler. Share it behind an `Arc`.
pub struct Scheduler {
    devices: Vec<DeviceSlot>,
    in_flight: AtomicI64,
    /// Admission gate; `None` means unbounded.
    admission: Option<Arc<Semaphore>>,
}

impl Scheduler {
    /// Build a scheduler over a fixed device set.
    ///
    /// `max_tasks_per_device == 0` disables the admission gate.
    pub fn new(devices: Vec<DeviceHandle>, max_tasks_per_device: u32) -> Self {
        let admission = if max_tasks_per_device > 0 && !devices.is_empty() {
            let permits = (devices.len() as u64 * max_tasks_per_device as u64)
                .min(Semaphore::MAX_PERMITS as u64) as usize;
            Some(Arc::new(Semaphore::new(permits)))
        } else {
            None
        };
        Self {
            devices: devices
                .into_iter()
                .map(|handle| DeviceSlot {
                    handle,
                    tasks: AtomicI32::new(0),
                })
                .collect(),
            in_flight: AtomicI64::new(0),
            admission,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The device with the fewest in-flight tasks, with its index.
    ///
    /// Returns `None` when no devices are registered.
    pub fn select_device(&self) -> Option<(&DeviceHandle, usize)> {
        let mut best: Option<(usize, i32)> = None;
        for (index, slot) in self.devices.iter().enumerate() {
            let load = slot.tasks.load(Ordering::Acquire);
            if best.map_or(true, |(_, min)| load < min) {
                best = Some((index, load));
            }
        }
        best.map(|(index, _)| (&self.devices[index].handle, index))
    }

    /// Reserve capacity on device `index`.
    ///
    /// Returns `None` if `index` is not a registered device.
    pub fn reserve(self: &Arc<Self>, index: usize) -> Option<ScheduleToken> {
        let slot = self.devices.get(index)?;
        slot.tasks.fetch_add(1, Ordering::AcqRel);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(ScheduleToken {
            scheduler: Arc::clone(self),
            index,
            _permit: None,
        })
    }

    fn release(&self, index: usize) {
        if let Some(slot) = self.devices.get(index) {
            slot.tasks.fetch_sub(1, Ordering::AcqRel);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Admit (if bounded), select the least-loaded device and reserve it.
    pub async fn schedule(self: &Arc<Self>) -> Result<ScheduleToken, ProveError> {
        if self.devices.is_empty() {
            return Err(ProveError::NoDevice);
        }
        let permit = match &self.admission {
            Some(gate) => Some(
                Arc::clone(gate)
                    .acquire_owned()
                    .await
                    .map_err(|_| ProveError::NoDevice)?,
            ),
            None => None,
        };
        let (_, index) = self.select_device().ok_or(ProveError::NoDevice)?;
        let mut token = self.reserve(index).ok_or(ProveError::NoDevice)?;
        token._permit = permit;
        debug!(
            device = token.device().ordinal,
            device_tasks = self.device_load(index).unwrap_or_default(),
            in_flight = self.in_flight_count(),
            "device reserved"
        );
        Ok(token)
    }

    /// Global number of in-flight requests.
    pub fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current in-flight task count of device `index`.
    pub fn device_load(&self, index: usize) -> Option<i32> {
        self.devices
            .get(index)
            .map(|slot| slot.tasks.load(Ordering::Acquire))
    }

    /// Snapshot of every device and its current load, in registration order.
    pub fn loads(&self) -> Vec<(DeviceHandle, i32)> {
        self.devices
            .iter()
            .map(|slot| (slot.handle.clone(), slot.tasks.load(Ordering::Acquire)))
            .collect()
    }
}

/// One reservation on one device. Dropping it releases the reservation.
pub struct ScheduleToken {
    scheduler: Arc<Scheduler>,
    index: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ScheduleToken {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.scheduler.devices[self.index].handle
    }
}

impl Drop for ScheduleToken {
    fn drop(&mut self) {
        self.scheduler.release(self.index);
    }
}

impl std::fmt::Debug for ScheduleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleToken")
            .field("index", &self.index)
            .field("device", &self.device().ordinal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn devices(n: u32) -> Vec<DeviceHandle> {
        (0..n).map(|i| DeviceHandle::new(i, format!("GPU {}", i))).collect()
    }

    fn hold(s: &Arc<Scheduler>, index: usize, n: usize) -> Vec<ScheduleToken> {
        (0..n).map(|_| s.reserve(index).unwrap()).collect()
    }

    #[test]
    fn test_selects_least_loaded() {
        let s = Arc::new(Scheduler::new(devices(3), 0));
        let _busy = hold(&s, 0, 2);
        let _light = hold(&s, 2, 1);
        assert_eq!(s.in_flight_count(), 3);

        let (handle, index) = s.select_device().unwrap();
        assert_eq!(index, 1);
        assert_eq!(handle.ordinal, 1);

        let token = s.reserve(index).unwrap();
        assert_eq!(s.device_load(1), Some(1));
        assert_eq!(s.in_flight_count(), 4);

        drop(token);
        assert_eq!(s.device_load(1), Some(0));
        assert_eq!(s.in_flight_count(), 3);
    }

    #[test]
    fn test_tie_break_is_first_index() {
        let s = Arc::new(Scheduler::new(devices(4), 0));
        assert_eq!(s.select_device().unwrap().1, 0);

        let _a = hold(&s, 0, 1);
        let _b = hold(&s, 1, 1);
        // Devices 2 and 3 tie at zero.
        assert_eq!(s.select_device().unwrap().1, 2);
    }

    #[test]
    fn test_no_devices() {
        let s = Arc::new(Scheduler::new(vec![], 0));
        assert!(s.select_device().is_none());
        assert!(s.reserve(0).is_none());
        assert_eq!(s.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_without_devices_fails() {
        let s = Arc::new(Scheduler::new(vec![], 4));
        assert!(matches!(s.schedule().await, Err(ProveError::NoDevice)));
    }

    #[tokio::test]
    async fn test_schedule_spreads_load() {
        let s = Arc::new(Scheduler::new(devices(2), 0));
        let a = s.schedule().await.unwrap();
        let b = s.schedule().await.unwrap();
        let c = s.schedule().await.unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 0));
        assert_eq!(s.in_flight_count(), 3);
        drop((a, b, c));
        assert_eq!(s.in_flight_count(), 0);
        assert_eq!(s.loads().iter().map(|(_, l)| *l).collect::<Vec<_>>(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_unbounded_admission_oversubscribes() {
        let s = Arc::new(Scheduler::new(devices(1), 0));
        let mut tokens = Vec::new();
        for _ in 0..16 {
            tokens.push(s.schedule().await.unwrap());
        }
        assert_eq!(s.device_load(0), Some(16));
    }

    #[tokio::test]
    async fn test_bounded_admission_waits_for_release() {
        let s = Arc::new(Scheduler::new(devices(1), 1));
        let first = s.schedule().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(50), s.schedule()).await;
        assert!(waiting.is_err(), "second request must wait for a permit");
        assert_eq!(s.in_flight_count(), 1);

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), s.schedule())
            .await
            .expect("permit released")
            .unwrap();
        assert_eq!(second.index(), 0);
        assert_eq!(s.in_flight_count(), 1);
    }

    #[test]
    fn test_concurrent_reserve_release_balances() {
        let s = Arc::new(Scheduler::new(devices(3), 0));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let s = &s;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        let (_, index) = s.select_device().unwrap();
                        let token = s.reserve(index).unwrap();
                        assert!(s.in_flight_count() >= 1);
                        drop(token);
                    }
                });
            }
        });
        assert_eq!(s.in_flight_count(), 0);
        assert!(s.loads().iter().all(|(_, l)| *l == 0));
    }
}
