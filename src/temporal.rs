use serde::Serialize;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TemporalSignals {
    /// Current sample minus the previous one; 0 on the first sample.
    pub brightness_change: f64,
    pub significant_change: bool,
    pub direction: ChangeDirection,
    /// Population std-dev of the window once it is full, else 0.
    pub stability_score: f64,
}

/// Bounded FIFO of recent brightness samples (oldest evicted first).
#[derive(Clone, Debug)]
pub struct TemporalWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    change_threshold: f64,
}

impl TemporalWindow {
    pub fn new(capacity: usize, change_threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
            change_threshold,
        }
    }

    pub fn push(&mut self, brightness: f64) -> TemporalSignals {
        self.samples.push_back(brightness);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }

        let mut signals = TemporalSignals::default();
        if self.samples.len() >= 2 {
            let previous = self.samples[self.samples.len() - 2];
            let change = brightness - previous;
            signals.brightness_change = change;
            if change.abs() > self.change_threshold {
                signals.significant_change = true;
                signals.direction = if change > 0.0 {
                    ChangeDirection::Increase
                } else {
                    ChangeDirection::Decrease
                };
            }
        }
        if self.is_full() {
            signals.stability_score = self.std_dev();
        }
        signals
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    fn std_dev(&self) -> f64 {
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_no_change() {
        let mut window = TemporalWindow::new(5, 30.0);
        let s = window.push(100.0);
        assert_eq!(s.brightness_change, 0.0);
        assert!(!s.significant_change);
        assert_eq!(s.direction, ChangeDirection::None);
    }

    #[test]
    fn detects_significant_changes_in_both_directions() {
        let mut window = TemporalWindow::new(5, 30.0);
        window.push(40.0);
        let up = window.push(90.0);
        assert!(up.significant_change);
        assert_eq!(up.direction, ChangeDirection::Increase);
        let small = window.push(110.0);
        assert!(!small.significant_change);
        let down = window.push(20.0);
        assert_eq!(down.direction, ChangeDirection::Decrease);
        assert_eq!(down.brightness_change, -90.0);
    }

    #[test]
    fn never_exceeds_capacity_and_scores_only_when_full() {
        let mut window = TemporalWindow::new(3, 30.0);
        assert_eq!(window.push(10.0).stability_score, 0.0);
        assert_eq!(window.push(20.0).stability_score, 0.0);
        let full = window.push(30.0);
        assert!(full.stability_score > 0.0);
        for i in 0..20 {
            let s = window.push(i as f64);
            assert!(window.len() <= 3);
            assert!(s.stability_score >= 0.0);
        }
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![17.0, 18.0, 19.0]);
    }

    #[test]
    fn reset_clears_history() {
        let mut window = TemporalWindow::new(2, 30.0);
        window.push(1.0);
        window.push(200.0);
        window.reset();
        assert!(window.is_empty());
        assert!(!window.push(0.0).significant_change);
    }
}
