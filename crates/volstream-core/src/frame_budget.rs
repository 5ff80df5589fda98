use crate::work_timer::WorkTimer;

use std::time::{Duration, Instant};

/// A wall-clock instant by which a frame's work should be finished.
///
/// Deadlines are `Copy + Sync`, so worker threads can check them without synchronization.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    end: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            end: start + budget,
        }
    }

    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// A deadline that has already passed.
    pub fn expired_now() -> Self {
        Self::after(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.end
    }

    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Estimates how many work items fit into the remaining time of a frame, based on measured per-item CPU time.
pub struct FrameBudget {
    num_threads: u32,
    item_time_estimate_us: u32,
    timer: Option<WorkTimer>,
}

impl FrameBudget {
    pub fn new(num_threads: u32, initial_item_time_estimate_us: u32) -> Self {
        Self {
            num_threads: num_threads.max(1),
            item_time_estimate_us: initial_item_time_estimate_us.max(1),
            timer: None,
        }
    }

    pub fn reset_timer(&mut self) {
        self.timer = Some(WorkTimer::start());
    }

    pub fn complete_item(&mut self, cpu_time: Duration) {
        self.timer
            .get_or_insert_with(WorkTimer::start)
            .complete_item(cpu_time);
    }

    pub fn update_estimate(&mut self) {
        if let Some(timer) = self.timer.as_ref() {
            if timer.items_completed() > 0 {
                self.item_time_estimate_us = timer.average_cpu_time_us().max(1);
            }
        }
    }

    pub fn item_time_estimate_us(&self) -> u32 {
        self.item_time_estimate_us
    }

    /// The number of items all threads together can finish within `remaining`. Always at least 1, so a frame makes
    /// progress even on an exhausted budget.
    pub fn items_within(&self, remaining: Duration) -> usize {
        let remaining_us = remaining.as_micros().min(u32::MAX as u128) as u64;
        let items = remaining_us * self.num_threads as u64 / self.item_time_estimate_us as u64;
        (items as usize).max(1)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_budget_is_expired() {
        let deadline = Deadline::after_millis(0);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn generous_budget_is_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(3000));
    }

    #[test]
    fn items_within_scales_with_threads_and_estimate() {
        let mut budget = FrameBudget::new(4, 1000);
        assert_eq!(budget.items_within(Duration::from_millis(10)), 40);

        budget.reset_timer();
        budget.complete_item(Duration::from_micros(500));
        budget.complete_item(Duration::from_micros(1500));
        budget.complete_item(Duration::from_micros(2000));
        budget.update_estimate();
        assert_eq!(budget.item_time_estimate_us(), 1333);
        assert_eq!(budget.items_within(Duration::ZERO), 1);
    }
}
