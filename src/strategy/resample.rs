//! Bar Resampler - Aggregates fine bars into coarser wall-clock buckets
//!
//! Minute bars from the broker are rolled up into 5-minute bars for the
//! live band check. Buckets are aligned to the epoch (so 14:35, 14:40, ...)
//! and each emitted bar carries the bucket start as its timestamp:
//! open = first, high = max, low = min, close = last, volume = sum.

use chrono::{DateTime, Duration, Utc};

use crate::domain::Bar;

/// Accumulates bars into fixed-period buckets
#[derive(Debug)]
pub struct BarResampler {
    /// Bucket length in seconds
    period_secs: i64,
    /// Start of the bucket being built
    bucket_start: Option<DateTime<Utc>>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BarResampler {
    pub fn new(period: Duration) -> Self {
        Self {
            period_secs: period.num_seconds().max(1),
            bucket_start: None,
            open: 0.0,
            high: f64::MIN,
            low: f64::MAX,
            close: 0.0,
            volume: 0.0,
        }
    }

    pub fn five_minute() -> Self {
        Self::new(Duration::minutes(5))
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(self.period_secs)
    }

    /// Feed one bar. Returns the previous bucket when this bar opens a new one.
    pub fn update(&mut self, bar: &Bar) -> Option<Bar> {
        let start = self.bucket_of(bar.timestamp);

        match self.bucket_start {
            None => {
                self.start_bucket(start, bar);
                None
            }
            Some(current) if current == start => {
                self.high = self.high.max(bar.high);
                self.low = self.low.min(bar.low);
                self.close = bar.close;
                self.volume += bar.volume;
                None
            }
            Some(current) => {
                let completed = self.close_bucket(current);
                self.start_bucket(start, bar);
                Some(completed)
            }
        }
    }

    /// Emit the partially built bucket, if any
    pub fn flush(&mut self) -> Option<Bar> {
        let start = self.bucket_start.take()?;
        Some(self.close_bucket(start))
    }

    /// Resample a whole ordered series; the trailing partial bucket is kept
    pub fn resample(bars: &[Bar], period: Duration) -> Vec<Bar> {
        let mut builder = Self::new(period);
        let mut out: Vec<Bar> = bars.iter().filter_map(|b| builder.update(b)).collect();
        out.extend(builder.flush());
        out
    }

    fn bucket_of(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let aligned = secs - secs.rem_euclid(self.period_secs);
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    fn start_bucket(&mut self, start: DateTime<Utc>, bar: &Bar) {
        self.bucket_start = Some(start);
        self.open = bar.open;
        self.high = bar.high;
        self.low = bar.low;
        self.close = bar.close;
        self.volume = bar.volume;
    }

    fn close_bucket(&self, start: DateTime<Utc>) -> Bar {
        Bar::new(start, self.open, self.high, self.low, self.close, self.volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(m: u32, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap() + Duration::minutes(m as i64);
        Bar::new(ts, o, h, l, c, v)
    }

    #[test]
    fn test_aggregates_bucket() {
        let bars = vec![
            minute(0, 10.0, 10.2, 9.9, 10.1, 100.0),
            minute(1, 10.1, 10.5, 10.0, 10.4, 50.0),
            minute(2, 10.4, 10.4, 9.7, 9.8, 25.0),
            minute(5, 9.8, 9.9, 9.6, 9.7, 10.0),
        ];
        let out = BarResampler::resample(&bars, Duration::minutes(5));
        assert_eq!(out.len(), 2);

        let first = out[0];
        assert_eq!(first.timestamp, bars[0].timestamp);
        assert_eq!(first.open, 10.0);
        assert_eq!(first.high, 10.5);
        assert_eq!(first.low, 9.7);
        assert_eq!(first.close, 9.8);
        assert_eq!(first.volume, 175.0);

        assert_eq!(out[1].close, 9.7);
    }

    #[test]
    fn test_buckets_align_to_clock() {
        // 14:03 and 14:04 share the 14:00 bucket, 14:06 opens 14:05
        let bars = vec![
            minute(3, 1.0, 1.0, 1.0, 1.0, 1.0),
            minute(4, 2.0, 2.0, 2.0, 2.0, 1.0),
            minute(6, 3.0, 3.0, 3.0, 3.0, 1.0),
        ];
        let out = BarResampler::resample(&bars, Duration::minutes(5));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp, Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap());
        assert_eq!(out[1].timestamp, Utc.with_ymd_and_hms(2026, 3, 2, 14, 5, 0).unwrap());
    }

    #[test]
    fn test_update_emits_on_rollover() {
        let mut builder = BarResampler::five_minute();
        assert!(builder.update(&minute(0, 1.0, 1.0, 1.0, 1.0, 1.0)).is_none());
        assert!(builder.update(&minute(4, 1.0, 1.0, 1.0, 1.0, 1.0)).is_none());
        let done = builder.update(&minute(5, 2.0, 2.0, 2.0, 2.0, 1.0)).unwrap();
        assert_eq!(done.volume, 2.0);
        assert_eq!(builder.flush().unwrap().close, 2.0);
        assert!(builder.flush().is_none());
    }

    #[test]
    fn test_empty_input() {
        assert!(BarResampler::resample(&[], Duration::minutes(5)).is_empty());
    }
}
