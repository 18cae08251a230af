use std::{
    fmt::Debug,
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use strum::{EnumCount, EnumIter, IntoEnumIterator};

#[repr(usize)]
#[derive(Clone, Copy, EnumIter, EnumCount)]
pub enum Timed {
    Total,
    Seeding,
    Training,
    Selection,
}

impl Debug for Timed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Timed::Total => "total",
            Timed::Seeding => "seeding",
            Timed::Training => "training",
            Timed::Selection => "selection",
        };

        write!(f, "{}", str)
    }
}

#[repr(usize)]
#[derive(Clone, Copy, EnumIter, EnumCount)]
pub enum CountedValue {
    Candidates,
    WiggleVariants,
    ModelsTrained,
    ModelsAccepted,
    PrunedBelowThreshold,
}

impl Debug for CountedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            CountedValue::Candidates => "candidate seeds",
            CountedValue::WiggleVariants => "wiggle variants",
            CountedValue::ModelsTrained => "models trained",
            CountedValue::ModelsAccepted => "models accepted",
            CountedValue::PrunedBelowThreshold => "pruned below threshold",
        };

        write!(f, "{}", str)
    }
}

/// Counters and timings of a discovery run. Clones share their storage,
/// so cross-validation folds running in parallel all add to one tally.
#[derive(Clone, Default)]
pub struct Stats {
    times: Arc<[AtomicU64; Timed::COUNT]>,
    counted_values: Arc<[AtomicU64; CountedValue::COUNT]>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_time(&mut self, timed: Timed, time: Duration) {
        self.times[timed as usize].fetch_add(Self::nanos(time), Ordering::SeqCst);
    }

    pub fn time_total(&self, timed: Timed) -> Duration {
        Duration::from_nanos(self.times[timed as usize].load(Ordering::SeqCst))
    }

    fn time_pct(&self, timed: Timed) -> f64 {
        let total_nanos = self.times[Timed::Total as usize].load(Ordering::SeqCst) as f64;
        let nanos = self.times[timed as usize].load(Ordering::SeqCst) as f64;

        nanos / total_nanos
    }

    pub fn counted_value(&self, counted: CountedValue) -> u64 {
        self.counted_values[counted as usize].load(Ordering::SeqCst)
    }

    pub fn increment_count(&mut self, counted: CountedValue) {
        self.counted_values[counted as usize].fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_count(&mut self, counted: CountedValue, count: usize) {
        self.counted_values[counted as usize].fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn write(&self, out: &mut impl Write) -> anyhow::Result<()> {
        writeln!(out, "summary statistics:")?;

        let values: Vec<_> = CountedValue::iter().collect();
        let max_width = values
            .iter()
            .map(|c| format!("{c:?}: {}", self.counted_value(*c)).len())
            .max()
            .unwrap_or(0);

        for (idx, counted) in values.iter().enumerate() {
            let label = format!("{counted:?}");
            let count = self.counted_value(*counted);
            let tree = if idx + 1 == values.len() {
                " └─"
            } else {
                " ├─"
            };
            writeln!(
                out,
                "{tree} {label}: {count:>w$}",
                w = max_width - label.len()
            )?;
        }

        writeln!(
            out,
            "runtime: {:.2}s",
            self.time_total(Timed::Total).as_secs_f64()
        )?;

        let timed: Vec<_> = Timed::iter().skip(1).collect();
        for (idx, timed_value) in timed.iter().enumerate() {
            let tree = if idx + 1 == timed.len() {
                " └─"
            } else {
                " ├─"
            };
            writeln!(
                out,
                "{tree} {timed_value:?}: {:.2}s ({:5.2}%)",
                self.time_total(*timed_value).as_secs_f64(),
                self.time_pct(*timed_value) * 100.0,
            )?;
        }

        Ok(())
    }

    fn nanos(time: Duration) -> u64 {
        // u64::MAX nanoseconds is on the order of centuries,
        // so this clamp should be fine.
        time.as_nanos().min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_shared_across_clones() {
        let mut stats = Stats::new();
        let mut clone = stats.clone();

        stats.increment_count(CountedValue::Candidates);
        clone.add_count(CountedValue::Candidates, 2);

        assert_eq!(stats.counted_value(CountedValue::Candidates), 3);
        assert_eq!(clone.counted_value(CountedValue::Candidates), 3);
    }

    #[test]
    fn test_times_are_shared_across_clones() {
        let mut stats = Stats::new();
        let mut clone = stats.clone();

        stats.add_time(Timed::Training, Duration::from_millis(5));
        clone.add_time(Timed::Training, Duration::from_millis(5));

        assert_eq!(stats.time_total(Timed::Training), Duration::from_millis(10));
    }

    #[test]
    fn test_write_reports_all_counters() {
        let mut stats = Stats::new();
        stats.add_count(CountedValue::ModelsTrained, 3);
        stats.add_time(Timed::Total, Duration::from_millis(10));

        let mut out = vec![];
        stats.write(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("models trained"));
        assert!(text.contains("runtime"));
    }
}
