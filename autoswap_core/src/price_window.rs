use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// Rolling window of the most recent price samples, oldest first.
/// Length never exceeds `capacity` and timestamps never go backwards.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    samples: VecDeque<PricePoint>,
    capacity: usize,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild a window from stored samples (already chronological)
    pub fn from_points<I>(capacity: usize, points: I) -> Self
    where
        I: IntoIterator<Item = PricePoint>,
    {
        let mut window = Self::new(capacity);
        for point in points {
            window.push(point);
        }
        window
    }

    /// Append a sample, evicting the oldest past capacity.
    /// Returns false if the sample is older than the latest one.
    pub fn push(&mut self, point: PricePoint) -> bool {
        if let Some(last) = self.samples.back() {
            if point.timestamp < last.timestamp {
                warn!(
                    "Ignoring out-of-order price sample at {} (latest {})",
                    point.timestamp, last.timestamp
                );
                return false;
            }
        }

        self.samples.push_back(point);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.samples.back()
    }

    /// Last `n` samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<PricePoint> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Mean of the last `periods` prices; `None` with fewer samples
    pub fn moving_average(&self, periods: usize) -> Option<Decimal> {
        if periods == 0 || self.samples.len() < periods {
            return None;
        }

        let skip = self.samples.len() - periods;
        let sum = self
            .samples
            .iter()
            .skip(skip)
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.price))?;
        sum.checked_div(Decimal::from(periods))
    }

    /// Percent change between the latest price and the one `periods` samples
    /// earlier. Needs `periods + 1` samples and a non-zero base price.
    pub fn percent_change(&self, periods: usize) -> Option<Decimal> {
        let len = self.samples.len();
        if len < periods + 1 {
            return None;
        }

        let old = self.samples.get(len - periods - 1)?.price;
        let current = self.samples.back()?.price;
        if old.is_zero() {
            return None;
        }

        current
            .checked_sub(old)?
            .checked_div(old)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn window_of(prices: &[i64]) -> PriceWindow {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        PriceWindow::from_points(
            60,
            prices.iter().enumerate().map(|(i, p)| PricePoint {
                timestamp: start + Duration::minutes(i as i64),
                price: Decimal::from(*p),
            }),
        )
    }

    #[test]
    fn test_moving_average() {
        let window = window_of(&[1, 2, 3, 4, 5]);
        assert_eq!(window.moving_average(5), Some(Decimal::from(3)));
        assert_eq!(window.moving_average(2), Some(Decimal::new(45, 1)));
        assert_eq!(window.moving_average(6), None);
        assert_eq!(window.moving_average(0), None);
    }

    #[test]
    fn test_percent_change() {
        let window = window_of(&[100, 110]);
        assert_eq!(window.percent_change(1), Some(Decimal::from(10)));
        assert_eq!(window.percent_change(2), None);

        let window = window_of(&[0, 110]);
        assert_eq!(window.percent_change(1), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut window = PriceWindow::new(3);
        for i in 0..5 {
            window.push(PricePoint {
                timestamp: start + Duration::minutes(i),
                price: Decimal::from(i),
            });
        }
        assert_eq!(window.len(), 3);
        let prices: Vec<Decimal> = window.recent(10).into_iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![Decimal::from(2), Decimal::from(3), Decimal::from(4)]);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut window = PriceWindow::new(60);
        assert!(window.push(PricePoint {
            timestamp: start,
            price: Decimal::ONE
        }));
        assert!(window.push(PricePoint {
            timestamp: start,
            price: Decimal::TWO
        }));
        assert!(!window.push(PricePoint {
            timestamp: start - Duration::seconds(1),
            price: Decimal::TEN
        }));
        assert_eq!(window.len(), 2);
        assert_eq!(window.latest().unwrap().price, Decimal::TWO);
    }
}
