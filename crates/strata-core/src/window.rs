//! Sliding windows over stream events.
//!
//! A window buffers the most recent events of one stream. Adding an event
//! returns the events it pushed out, which a join emits as expired
//! output when asked to.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::StreamEvent;
use crate::{Error, Result};

/// Window kind and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    /// Keeps the last `n` events.
    Length(usize),
    /// Keeps events whose timestamp is within the duration of the newest event.
    Time(Duration),
}

/// A sliding event window.
#[derive(Debug, Clone)]
pub struct Window {
    spec: WindowSpec,
    buffer: VecDeque<StreamEvent>,
}

impl Window {
    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWindow`] for a zero length or zero duration.
    pub fn new(spec: WindowSpec) -> Result<Self> {
        match spec {
            WindowSpec::Length(0) => {
                return Err(Error::InvalidWindow("length must be > 0".into()));
            }
            WindowSpec::Time(d) if d.is_zero() => {
                return Err(Error::InvalidWindow("duration must be > 0".into()));
            }
            _ => {}
        }
        Ok(Self {
            spec,
            buffer: VecDeque::new(),
        })
    }

    /// Creates a length window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWindow`] if `n` is zero.
    pub fn length(n: usize) -> Result<Self> {
        Self::new(WindowSpec::Length(n))
    }

    /// Creates a time window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWindow`] if `duration` is zero.
    pub fn time(duration: Duration) -> Result<Self> {
        Self::new(WindowSpec::Time(duration))
    }

    /// Window kind and size.
    #[must_use]
    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Adds `event` and returns the events that left the window, oldest first.
    pub fn add(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        let mut expired = Vec::new();
        match self.spec {
            WindowSpec::Length(n) => {
                self.buffer.push_back(event);
                while self.buffer.len() > n {
                    if let Some(old) = self.buffer.pop_front() {
                        expired.push(old);
                    }
                }
            }
            WindowSpec::Time(d) => {
                let span = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
                let cutoff = event.timestamp.saturating_sub(span);
                while self
                    .buffer
                    .front()
                    .is_some_and(|front| front.timestamp <= cutoff)
                {
                    if let Some(old) = self.buffer.pop_front() {
                        expired.push(old);
                    }
                }
                self.buffer.push_back(event);
            }
        }
        expired
    }

    /// Events currently in the window, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &StreamEvent> {
        self.buffer.iter()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if the window holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttributeValue;

    fn event(ts: i64, symbol: &str) -> StreamEvent {
        StreamEvent::new("FooStream", ts, vec![AttributeValue::from(symbol)])
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(Window::length(0).is_err());
        assert!(Window::time(Duration::ZERO).is_err());
    }

    #[test]
    fn test_length_window_expires_oldest() {
        let mut w = Window::length(1).unwrap();
        assert!(w.add(event(1, "WSO2")).is_empty());
        let expired = w.add(event(2, "IBM"));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data[0], AttributeValue::from("WSO2"));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_length_window_keeps_n() {
        let mut w = Window::length(5).unwrap();
        for i in 0..5 {
            assert!(w.add(event(i, "X")).is_empty());
        }
        assert_eq!(w.len(), 5);
        assert_eq!(w.add(event(5, "Y")).len(), 1);
    }

    #[test]
    fn test_time_window_expires_by_event_time() {
        let mut w = Window::time(Duration::from_secs(5)).unwrap();
        w.add(event(0, "A"));
        w.add(event(1_000, "B"));
        assert!(w.add(event(4_999, "C")).is_empty());
        let expired = w.add(event(5_000, "D"));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].timestamp, 0);
        let expired = w.add(event(20_000, "E"));
        assert_eq!(expired.len(), 3);
        assert_eq!(w.len(), 1);
        assert_eq!(w.events().next().map(|e| e.timestamp), Some(20_000));
    }
}
