// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scheduler Stack Runtime
//!
//! Each scheduler of a policy's stack gets one feed thread draining a
//! pending queue into the scheduler's `schedule` entry point:
//!
//! - `Accepted` — the scheduler owes the entry a callback; keep feeding
//! - `Delay` — wait `reschedule_delay_ms`, then re-offer the same entry
//! - `SkipEntry` — complete the entry with skip, keep feeding
//! - `StopRun` / `KillRun` — stop submissions, flush the pending queue
//!
//! The run engine flushes earlier schedulers on `StopRun` and all of them
//! on `KillRun`; see the callback path in the run module.

use crossbeam::channel::{unbounded, Receiver, Sender};
use fswarden_domain::services::scheduler::{ActionScheduler, SchedDecision, SchedItem, SchedStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

struct SchedShared {
    sched: Arc<dyn ActionScheduler>,
    terminate: AtomicBool,
    reschedule_delay_ms: u64,
}

/// Runtime resources of one scheduler in the stack.
pub struct SchedRes {
    shared: Arc<SchedShared>,
    tx: Sender<SchedItem>,
    rx: Receiver<SchedItem>,
    thread: Option<JoinHandle<()>>,
}

impl SchedRes {
    /// Initializes the scheduler and starts its feed thread.
    pub fn start(
        sched: Arc<dyn ActionScheduler>,
        reschedule_delay_ms: u64,
    ) -> Result<SchedRes, fswarden_domain::EngineError> {
        let (tx, rx) = unbounded::<SchedItem>();
        let shared = Arc::new(SchedShared {
            sched,
            terminate: AtomicBool::new(false),
            reschedule_delay_ms,
        });

        let thread_shared = shared.clone();
        let thread_rx = rx.clone();
        let thread = std::thread::Builder::new()
            .name(format!("sched-{}", shared.sched.name()))
            .spawn(move || feed_loop(thread_shared, thread_rx))
            .map_err(|e| {
                fswarden_domain::EngineError::internal_error(format!(
                    "cannot spawn scheduler thread: {}",
                    e
                ))
            })?;

        Ok(SchedRes {
            shared,
            tx,
            rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.sched.name()
    }

    /// Submits an entry. When the scheduler already terminated the run,
    /// the item is handed back and the caller treats it as skipped.
    pub fn push(&self, item: SchedItem) -> Result<(), SchedItem> {
        if self.shared.terminate.load(Ordering::Acquire) {
            return Err(item);
        }
        self.tx.send(item).map_err(|e| e.into_inner())
    }

    /// Drops every pending entry (completing each with the given status)
    /// and resets the scheduler.
    pub fn flush(&self, status: SchedStatus) {
        self.shared.terminate.store(true, Ordering::Release);
        while let Ok(item) = self.rx.try_recv() {
            (item.callback)(status);
        }
        if let Err(e) = self.shared.sched.reset() {
            warn!(sched = self.name(), error = %e, "scheduler reset failed");
        }
    }

    /// Reinitializes the scheduler for a new policy run. Fails when
    /// entries are still pending.
    pub fn reinit(&self) -> Result<(), fswarden_domain::EngineError> {
        if !self.rx.is_empty() {
            return Err(fswarden_domain::EngineError::internal_error(
                "trying to reinitialize a non-empty scheduler queue",
            ));
        }
        self.shared.sched.reset()?;
        self.shared.terminate.store(false, Ordering::Release);
        Ok(())
    }

    /// Stops the feed thread. Pending entries are completed as skipped.
    pub fn stop(&mut self) {
        self.shared.terminate.store(true, Ordering::Release);
        // closing the channel wakes the feed thread
        let (dead_tx, _) = unbounded();
        let old_tx = std::mem::replace(&mut self.tx, dead_tx);
        drop(old_tx);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        while let Ok(item) = self.rx.try_recv() {
            (item.callback)(SchedStatus::SkipEntry);
        }
    }
}

impl Drop for SchedRes {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed_loop(shared: Arc<SchedShared>, rx: Receiver<SchedItem>) {
    while let Ok(mut item) = rx.recv() {
        if shared.terminate.load(Ordering::Acquire) {
            (item.callback)(SchedStatus::SkipEntry);
            continue;
        }
        loop {
            debug!(sched = shared.sched.name(), id = %item.id, "submitting entry to scheduler");
            match shared.sched.schedule(item) {
                SchedDecision::Accepted => break,
                SchedDecision::Delay(back) => {
                    item = back;
                    if shared.reschedule_delay_ms > 0 {
                        debug!(
                            delay_ms = shared.reschedule_delay_ms,
                            "waiting before submitting new entries"
                        );
                        std::thread::sleep(Duration::from_millis(shared.reschedule_delay_ms));
                    }
                    if shared.terminate.load(Ordering::Acquire) {
                        (item.callback)(SchedStatus::SkipEntry);
                        break;
                    }
                }
                SchedDecision::SkipEntry(back) => {
                    (back.callback)(SchedStatus::SkipEntry);
                    break;
                }
                SchedDecision::StopRun(back) => {
                    shared.terminate.store(true, Ordering::Release);
                    (back.callback)(SchedStatus::StopRun);
                    // drain everything already queued
                    while let Ok(it) = rx.try_recv() {
                        (it.callback)(SchedStatus::StopRun);
                    }
                    debug!(sched = shared.sched.name(), "stop submitting entries for current policy run");
                    break;
                }
                SchedDecision::KillRun(back) => {
                    shared.terminate.store(true, Ordering::Release);
                    (back.callback)(SchedStatus::KillRun);
                    while let Ok(it) = rx.try_recv() {
                        (it.callback)(SchedStatus::KillRun);
                    }
                    debug!(sched = shared.sched.name(), "killing current policy run");
                    break;
                }
            }
        }
    }
}

/// A simple admission controller: at most `max_per_run` entries per run,
/// then every further entry is skipped.
pub struct MaxPerRunScheduler {
    max_per_run: u64,
    admitted: AtomicU64,
}

impl MaxPerRunScheduler {
    pub fn new(max_per_run: u64) -> MaxPerRunScheduler {
        MaxPerRunScheduler {
            max_per_run,
            admitted: AtomicU64::new(0),
        }
    }
}

impl ActionScheduler for MaxPerRunScheduler {
    fn name(&self) -> &str {
        "max_per_run"
    }

    fn reset(&self) -> Result<(), fswarden_domain::EngineError> {
        self.admitted.store(0, Ordering::Release);
        Ok(())
    }

    fn schedule(&self, item: SchedItem) -> SchedDecision {
        let n = self.admitted.fetch_add(1, Ordering::AcqRel);
        if n < self.max_per_run {
            (item.callback)(SchedStatus::Ok);
            SchedDecision::Accepted
        } else {
            SchedDecision::StopRun(item)
        }
    }
}

/// Rate limiter: admits `max_count` entries (and `max_vol` bytes) per
/// `period_ms` window, delaying entries beyond that.
pub struct RateLimitScheduler {
    max_count: u64,
    max_vol: u64,
    period_ms: u64,
    window: parking_lot::Mutex<RateWindow>,
}

struct RateWindow {
    start: std::time::Instant,
    count: u64,
    vol: u64,
}

impl RateLimitScheduler {
    pub fn new(max_count: u64, max_vol: u64, period_ms: u64) -> RateLimitScheduler {
        RateLimitScheduler {
            max_count,
            max_vol,
            period_ms: period_ms.max(1),
            window: parking_lot::Mutex::new(RateWindow {
                start: std::time::Instant::now(),
                count: 0,
                vol: 0,
            }),
        }
    }
}

impl ActionScheduler for RateLimitScheduler {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn reset(&self) -> Result<(), fswarden_domain::EngineError> {
        let mut w = self.window.lock();
        w.start = std::time::Instant::now();
        w.count = 0;
        w.vol = 0;
        Ok(())
    }

    fn schedule(&self, item: SchedItem) -> SchedDecision {
        let mut w = self.window.lock();
        if w.start.elapsed().as_millis() as u64 >= self.period_ms {
            w.start = std::time::Instant::now();
            w.count = 0;
            w.vol = 0;
        }

        let size = item.attrs.size().unwrap_or(0);
        let count_ok = self.max_count == 0 || w.count < self.max_count;
        let vol_ok = self.max_vol == 0 || w.vol + size <= self.max_vol || w.vol == 0;
        if count_ok && vol_ok {
            w.count += 1;
            w.vol += size;
            drop(w);
            (item.callback)(SchedStatus::Ok);
            SchedDecision::Accepted
        } else {
            SchedDecision::Delay(item)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::{AttrSet, EntryId};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn test_item(i: u32, done: mpsc::Sender<(u32, SchedStatus)>) -> SchedItem {
        SchedItem {
            id: EntryId::fid(0x1, i, 0),
            attrs: Arc::new(AttrSet::new()),
            callback: Box::new(move |st| {
                let _ = done.send((i, st));
            }),
        }
    }

    #[test]
    fn test_max_per_run_stops_after_limit() {
        let sched: Arc<dyn ActionScheduler> = Arc::new(MaxPerRunScheduler::new(2));
        let res = SchedRes::start(sched, 1).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..4 {
            let _ = res.push(test_item(i, tx.clone()));
        }

        let mut ok = 0;
        let mut stopped = 0;
        for _ in 0..4 {
            match rx.recv_timeout(std::time::Duration::from_secs(2)) {
                Ok((_, SchedStatus::Ok)) => ok += 1,
                Ok((_, SchedStatus::StopRun)) => stopped += 1,
                Ok((_, other)) => panic!("unexpected status {:?}", other),
                Err(_) => break,
            }
        }
        assert_eq!(ok, 2);
        assert!(stopped >= 1);
    }

    #[test]
    fn test_rate_limit_delays_then_admits() {
        let sched: Arc<dyn ActionScheduler> = Arc::new(RateLimitScheduler::new(1, 0, 50));
        let res = SchedRes::start(sched, 5).unwrap();
        let (tx, rx) = mpsc::channel();

        let _ = res.push(test_item(1, tx.clone()));
        let _ = res.push(test_item(2, tx.clone()));

        let first = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(first.1, SchedStatus::Ok);
        assert_eq!(second.1, SchedStatus::Ok);
    }

    #[test]
    fn test_flush_completes_pending() {
        struct NeverScheduler(AtomicUsize);
        impl ActionScheduler for NeverScheduler {
            fn name(&self) -> &str {
                "never"
            }
            fn reset(&self) -> Result<(), fswarden_domain::EngineError> {
                Ok(())
            }
            fn schedule(&self, item: SchedItem) -> SchedDecision {
                self.0.fetch_add(1, Ordering::SeqCst);
                SchedDecision::Delay(item)
            }
        }

        let res = SchedRes::start(Arc::new(NeverScheduler(AtomicUsize::new(0))), 20).unwrap();
        let (tx, rx) = mpsc::channel();
        let _ = res.push(test_item(1, tx.clone()));
        std::thread::sleep(std::time::Duration::from_millis(30));
        res.flush(SchedStatus::SkipEntry);

        let (_, st) = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(st, SchedStatus::SkipEntry);
    }
}
