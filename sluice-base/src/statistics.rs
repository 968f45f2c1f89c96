use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StatisticValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    ByteSize(u64),
    BytesPerSecond(f64),
    // Stored in microseconds
    Time(u64),
    // 0.0 - 1.0
    Percentage(f64),
    Text(String),
}

/// A single named value reported by a stream stack entry or the scheduler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub owner: String,
    pub name: String,
    pub value: StatisticValue,
}

impl Statistic {
    pub fn new(
        owner: &str,
        name: &str,
        value: StatisticValue,
    ) -> Self {
        Statistic {
            owner: owner.to_string(),
            name: name.to_string(),
            value,
        }
    }

    pub fn integer(
        owner: &str,
        name: &str,
        value: i64,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Integer(value))
    }

    pub fn boolean(
        owner: &str,
        name: &str,
        value: bool,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Boolean(value))
    }

    pub fn byte_size(
        owner: &str,
        name: &str,
        value: u64,
    ) -> Self {
        Self::new(owner, name, StatisticValue::ByteSize(value))
    }

    pub fn bytes_per_second(
        owner: &str,
        name: &str,
        value: f64,
    ) -> Self {
        Self::new(owner, name, StatisticValue::BytesPerSecond(value))
    }

    pub fn time(
        owner: &str,
        name: &str,
        value: Duration,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::Time(value.as_micros().min(u64::MAX as u128) as u64),
        )
    }

    pub fn percentage(
        owner: &str,
        name: &str,
        value: f64,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Percentage(value))
    }

    pub fn text(
        owner: &str,
        name: &str,
        value: String,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Text(value))
    }
}

/// Moving window over the last `N` samples with a running total
pub struct AverageWindow<const N: usize> {
    samples: [u64; N],
    next: usize,
    count: usize,
    total: u64,
}

impl<const N: usize> Default for AverageWindow<N> {
    fn default() -> Self {
        assert!(N > 0);
        AverageWindow {
            samples: [0; N],
            next: 0,
            count: 0,
            total: 0,
        }
    }
}

impl<const N: usize> AverageWindow<N> {
    pub fn push_entry(
        &mut self,
        value: u64,
    ) {
        if self.count == N {
            self.total -= self.samples[self.next];
        } else {
            self.count += 1;
        }
        self.samples[self.next] = value;
        self.total = self.total.saturating_add(value);
        self.next = (self.next + 1) % N;
    }

    pub fn push_duration(
        &mut self,
        duration: Duration,
    ) {
        self.push_entry(duration.as_micros().min(u64::MAX as u128) as u64);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total / self.count as u64
        }
    }

    pub fn average_duration(&self) -> Duration {
        Duration::from_micros(self.average())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn window_drops_oldest_sample() {
        let mut window = AverageWindow::<3>::default();
        window.push_entry(3);
        window.push_entry(6);
        assert_eq!(window.average(), 4);
        window.push_entry(9);
        window.push_entry(12);
        assert_eq!(window.count(), 3);
        assert_eq!(window.total(), 27);
        assert_eq!(window.average(), 9);
    }

    #[test]
    fn empty_window_averages_to_zero() {
        let window = AverageWindow::<4>::default();
        assert_eq!(window.average(), 0);
        assert_eq!(window.average_duration(), Duration::ZERO);
    }
}
