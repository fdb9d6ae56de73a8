//! Rolling-window historical Value at Risk.

use std::collections::VecDeque;

/// Rolling window of portfolio returns with 95% historical VaR.
///
/// The gate only arms once the window is full; until then `var_95`
/// returns `None` so a handful of early observations cannot halt trading.
#[derive(Debug, Clone)]
pub struct VarWindow {
    returns: VecDeque<f64>,
    capacity: usize,
}

impl VarWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            returns: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Push one period return, evicting the oldest when full. Non-finite
    /// values are ignored.
    pub fn push(&mut self, period_return: f64) {
        if !period_return.is_finite() {
            return;
        }
        self.returns.push_back(period_return);
        while self.returns.len() > self.capacity {
            self.returns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.returns.len() >= self.capacity
    }

    /// Historical 95% VaR, as a positive loss fraction.
    ///
    /// The k-th smallest return with `k = ceil(0.05 * n)` (the lower
    /// empirical 5th percentile), negated and floored at zero: a window of
    /// gains has zero VaR.
    pub fn var_95(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        let mut sorted: Vec<f64> = self.returns.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let k = (0.05 * sorted.len() as f64).ceil() as usize;
        let idx = k.saturating_sub(1).min(sorted.len() - 1);
        Some((-sorted[idx]).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_armed_until_full() {
        let mut window = VarWindow::new(5);
        for _ in 0..4 {
            window.push(-0.10);
        }
        assert!(window.var_95().is_none());

        window.push(-0.10);
        assert!(window.var_95().is_some());
    }

    #[test]
    fn test_var_is_positive_loss() {
        let mut window = VarWindow::new(20);
        for i in 0..20 {
            // Mostly small gains, one -4% day.
            window.push(if i == 7 { -0.04 } else { 0.002 });
        }
        let var = window.var_95().unwrap();
        assert!((var - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_all_gains_zero_var() {
        let mut window = VarWindow::new(10);
        for _ in 0..10 {
            window.push(0.01);
        }
        assert_eq!(window.var_95(), Some(0.0));
    }

    #[test]
    fn test_rolling_eviction() {
        let mut window = VarWindow::new(3);
        window.push(-0.10);
        window.push(0.01);
        window.push(0.01);
        window.push(0.01); // evicts the -10% day
        assert_eq!(window.len(), 3);
        assert_eq!(window.var_95(), Some(0.0));
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut window = VarWindow::new(2);
        window.push(f64::NAN);
        window.push(f64::INFINITY);
        assert!(window.is_empty());
    }
}
