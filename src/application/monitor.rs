//! Live Monitor
//!
//! Polls fresh minute bars for an approved ticker, resamples them, recomputes
//! the band on the latest bucket and decides whether the entry condition
//! holds. Held tickers are never polled.

use std::sync::Arc;

use chrono::Duration;

use crate::config::{BandSource, LiveSection};
use crate::domain::{ApprovalRecord, Bar, MonitorState, SignalEvent};
use crate::ports::{BarInterval, BarSource, Lookback, MarketDataError};
use crate::strategy::{BandPoint, BarResampler, BollingerBand, EntryRule, DEFAULT_BAND_WINDOW};

/// What the monitor saw for one ticker this poll
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// Band condition met; hand to the execution engine
    Signal(SignalEvent),
    /// Band computed, condition not met
    NoSignal { trigger_price: f64, band: BandPoint },
    /// Too few resampled bars for a full window
    Insufficient { bars: usize, required: usize },
}

impl MonitorOutcome {
    pub fn state(&self) -> MonitorState {
        match self {
            MonitorOutcome::Signal(_) => MonitorState::Armed,
            _ => MonitorState::Idle,
        }
    }
}

/// Price compared against the lower band under an entry rule
pub fn trigger_price(bar: &Bar, rule: EntryRule) -> f64 {
    match rule {
        EntryRule::Close => bar.close,
        EntryRule::Touch => bar.low,
    }
}

/// Live monitor settings
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval: BarInterval,
    pub bar_limit: usize,
    pub resample: Duration,
    pub band_window: usize,
    pub band_source: BandSource,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: BarInterval::Minute,
            bar_limit: 100,
            resample: Duration::minutes(5),
            band_window: DEFAULT_BAND_WINDOW,
            band_source: BandSource::Close,
        }
    }
}

impl MonitorSettings {
    pub fn from_section(section: &LiveSection) -> Self {
        Self {
            interval: BarInterval::parse(&section.bar_interval).unwrap_or(BarInterval::Minute),
            bar_limit: section.bar_limit,
            resample: Duration::minutes(section.resample_minutes as i64),
            band_window: section.band_window,
            band_source: section.band_source,
        }
    }
}

pub struct LiveMonitor {
    source: Arc<dyn BarSource>,
    settings: MonitorSettings,
}

impl LiveMonitor {
    pub fn new(source: Arc<dyn BarSource>, settings: MonitorSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Fetch fresh bars for `ticker` and evaluate them
    pub async fn poll(
        &self,
        ticker: &str,
        record: &ApprovalRecord,
    ) -> Result<MonitorOutcome, MarketDataError> {
        let bars = self
            .source
            .get_bars(ticker, self.settings.interval, Lookback::Bars(self.settings.bar_limit))
            .await?;
        Ok(self.evaluate(ticker, record, &bars))
    }

    /// Evaluate already-fetched raw bars
    pub fn evaluate(&self, ticker: &str, record: &ApprovalRecord, raw: &[Bar]) -> MonitorOutcome {
        let bars: Vec<Bar> = BarResampler::resample(raw, self.settings.resample)
            .into_iter()
            .filter(|b| !b.is_void())
            .collect();

        let required = self.settings.band_window;
        let Some(last) = bars.last().copied() else {
            return MonitorOutcome::Insufficient { bars: 0, required };
        };

        let prices: Vec<f64> = match self.settings.band_source {
            BandSource::Close => bars.iter().map(|b| b.close).collect(),
            BandSource::Typical => bars.iter().map(|b| b.typical_price()).collect(),
        };

        let Some(band) = BollingerBand::new(required, record.config.dev).latest(&prices) else {
            return MonitorOutcome::Insufficient {
                bars: bars.len(),
                required,
            };
        };

        let trigger = trigger_price(&last, record.config.entry_rule);
        if !band.is_breached(trigger) {
            return MonitorOutcome::NoSignal {
                trigger_price: trigger,
                band,
            };
        }

        MonitorOutcome::Signal(SignalEvent {
            ticker: ticker.to_string(),
            reference_price: last.close,
            trigger_price: trigger,
            band,
            score: record.score,
            config: record.config.clone(),
            bar_time: last.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::MockBarSource;
    use crate::strategy::StrategyConfig;
    use chrono::{TimeZone, Utc};

    /// 20 five-minute closes with mean 10.5 and sample std 0.5, ending at `last`
    fn window_with_last(last: f64) -> Vec<f64> {
        let last_dev = last - 10.5;
        let e = ((19.0 * 0.25 - last_dev * last_dev - last_dev * last_dev) / 18.0).sqrt();
        let mut closes = Vec::with_capacity(20);
        for i in 0..18 {
            closes.push(if i % 2 == 0 { 10.5 + e } else { 10.5 - e });
        }
        closes.push(10.5 - last_dev);
        closes.push(last);
        closes
    }

    fn bars_from(closes: &[f64], low_offset: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(start + Duration::minutes(5 * i as i64), c, c + 0.05, c - low_offset, c, 500.0)
            })
            .collect()
    }

    fn monitor() -> LiveMonitor {
        LiveMonitor::new(Arc::new(MockBarSource::new()), MonitorSettings::default())
    }

    fn record(rule: EntryRule) -> ApprovalRecord {
        ApprovalRecord::new(StrategyConfig::with_dev(1.5).with_entry_rule(rule), 0.4)
    }

    #[test]
    fn test_window_fixture() {
        let closes = window_with_last(9.8);
        let band = BollingerBand::new(20, 1.5).latest(&closes).unwrap();
        assert!((band.sma - 10.5).abs() < 1e-9);
        assert!((band.std - 0.5).abs() < 1e-9);
        assert!((band.lower - 9.75).abs() < 1e-9);
    }

    #[test]
    fn test_close_above_lower_no_signal() {
        let outcome = monitor().evaluate("XYZ", &record(EntryRule::Close), &bars_from(&window_with_last(9.8), 0.01));
        match outcome {
            MonitorOutcome::NoSignal { trigger_price, band } => {
                assert_eq!(trigger_price, 9.8);
                assert!((band.lower - 9.75).abs() < 1e-9);
            }
            other => panic!("expected no signal, got {:?}", other),
        }
    }

    #[test]
    fn test_close_below_lower_signals() {
        let outcome = monitor().evaluate("XYZ", &record(EntryRule::Close), &bars_from(&window_with_last(9.7), 0.01));
        assert_eq!(outcome.state(), MonitorState::Armed);
        let MonitorOutcome::Signal(event) = outcome else { panic!("expected signal") };
        assert_eq!(event.ticker, "XYZ");
        assert_eq!(event.reference_price, 9.7);
        assert!((event.target() - 10.5).abs() < 1e-9);
        assert_eq!(event.score, 0.4);
    }

    #[test]
    fn test_touch_rule_uses_low() {
        // close 9.8 stays above 9.75 but the low dips to 9.7
        let bars = bars_from(&window_with_last(9.8), 0.1);
        assert!(matches!(
            monitor().evaluate("XYZ", &record(EntryRule::Close), &bars),
            MonitorOutcome::NoSignal { .. }
        ));
        let MonitorOutcome::Signal(event) = monitor().evaluate("XYZ", &record(EntryRule::Touch), &bars) else {
            panic!("expected signal")
        };
        assert!((event.trigger_price - 9.7).abs() < 1e-9);
        assert_eq!(event.reference_price, 9.8);
    }

    #[test]
    fn test_insufficient_bars() {
        let closes = window_with_last(9.7);
        let outcome = monitor().evaluate("XYZ", &record(EntryRule::Close), &bars_from(&closes[..19], 0.01));
        assert_eq!(outcome, MonitorOutcome::Insufficient { bars: 19, required: 20 });
        assert_eq!(
            monitor().evaluate("XYZ", &record(EntryRule::Close), &[]),
            MonitorOutcome::Insufficient { bars: 0, required: 20 }
        );
    }

    #[test]
    fn test_minute_bars_are_resampled() {
        // five identical minute bars per bucket collapse to one 5-minute bar
        let closes = window_with_last(9.7);
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        let minutes: Vec<Bar> = closes
            .iter()
            .enumerate()
            .flat_map(|(i, &c)| {
                (0..5).map(move |m| {
                    Bar::new(start + Duration::minutes(5 * i as i64 + m), c, c, c, c, 100.0)
                })
            })
            .collect();
        assert_eq!(minutes.len(), 100);
        assert_eq!(monitor().evaluate("XYZ", &record(EntryRule::Close), &minutes).state(), MonitorState::Armed);
    }

    #[test]
    fn test_typical_price_source() {
        let settings = MonitorSettings {
            band_source: BandSource::Typical,
            ..Default::default()
        };
        let monitor = LiveMonitor::new(Arc::new(MockBarSource::new()), settings);
        // high = close + 0.05, low = close - 0.05: typical equals close
        let outcome = monitor.evaluate("XYZ", &record(EntryRule::Close), &bars_from(&window_with_last(9.7), 0.05));
        let MonitorOutcome::Signal(event) = outcome else { panic!("expected signal") };
        assert!((event.band.sma - 10.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_poll_uses_minute_bars() {
        let source = MockBarSource::new().with_bars("XYZ", bars_from(&window_with_last(9.7), 0.01));
        let monitor = LiveMonitor::new(Arc::new(source.clone()), MonitorSettings::default());

        let outcome = monitor.poll("XYZ", &record(EntryRule::Close)).await.unwrap();
        assert_eq!(outcome.state(), MonitorState::Armed);
        assert_eq!(source.get_calls(), vec![("XYZ".to_string(), BarInterval::Minute)]);
    }
}
