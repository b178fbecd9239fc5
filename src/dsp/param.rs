//! Automatable parameter — a value timeline in the style of WebAudio's
//! `AudioParam`.
//!
//! Events are kept sorted by time. A ramp interpolates from the previous
//! event's (time, value) to its own (time, value); before the first event
//! the intrinsic value applies.

/// One scheduled automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Set { time: f64, value: f64 },
    Linear { time: f64, value: f64 },
    Exponential { time: f64, value: f64 },
}

impl Event {
    fn time(&self) -> f64 {
        match *self {
            Event::Set { time, .. } | Event::Linear { time, .. } | Event::Exponential { time, .. } => {
                time
            }
        }
    }

    fn value(&self) -> f64 {
        match *self {
            Event::Set { value, .. }
            | Event::Linear { value, .. }
            | Event::Exponential { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioParam {
    intrinsic: f64,
    events: Vec<Event>,
}

impl AudioParam {
    pub fn new(value: f64) -> Self {
        AudioParam {
            intrinsic: value,
            events: Vec::new(),
        }
    }

    /// Set the value used when no automation applies.
    pub fn set_value(&mut self, value: f64) {
        self.intrinsic = value;
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(Event::Set { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(Event::Linear { time, value });
    }

    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(Event::Exponential { time, value });
    }

    /// Drop every event at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Whether any automation is scheduled.
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Time of the last scheduled event, if any.
    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().map(Event::time)
    }

    /// Computed value at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        // Index of the first event strictly after `time`.
        let next = self.events.partition_point(|e| e.time() <= time);

        let (prev_time, prev_value) = if next == 0 {
            (0.0, self.intrinsic)
        } else {
            let e = self.events[next - 1];
            (e.time(), e.value())
        };

        match self.events.get(next) {
            Some(Event::Linear { time: t1, value: v1 }) => {
                let span = t1 - prev_time;
                if span <= 0.0 {
                    return *v1;
                }
                let frac = ((time - prev_time) / span).clamp(0.0, 1.0);
                prev_value + (v1 - prev_value) * frac
            }
            Some(Event::Exponential { time: t1, value: v1 }) => {
                let span = t1 - prev_time;
                // Zero or sign-changing endpoints hold the previous value.
                if span <= 0.0 || prev_value == 0.0 || *v1 == 0.0 || prev_value.signum() != v1.signum()
                {
                    return prev_value;
                }
                let frac = ((time - prev_time) / span).clamp(0.0, 1.0);
                prev_value * (v1 / prev_value).powf(frac)
            }
            _ => prev_value,
        }
    }

    /// Events with equal times keep insertion order.
    fn insert(&mut self, event: Event) {
        let t = event.time();
        let idx = self.events.partition_point(|e| e.time() <= t);
        self.events.insert(idx, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_value_without_events() {
        let p = AudioParam::new(0.7);
        assert_eq!(p.value_at(0.0), 0.7);
        assert_eq!(p.value_at(100.0), 0.7);
    }

    #[test]
    fn linear_ramp_interpolates() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 1.0);
        p.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(p.value_at(0.5), 0.0);
        assert!((p.value_at(1.5) - 0.5).abs() < 1e-12);
        assert_eq!(p.value_at(2.0), 1.0);
        assert_eq!(p.value_at(3.0), 1.0);
    }

    #[test]
    fn exponential_ramp_interpolates() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(5000.0, 0.0);
        p.exponential_ramp_to_value_at_time(2000.0, 1.0);
        let mid = p.value_at(0.5);
        assert!((mid - (5000.0_f64 * 2000.0).sqrt()).abs() < 1e-6);
        assert_eq!(p.value_at(1.0), 2000.0);
    }

    #[test]
    fn exponential_ramp_to_zero_holds() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.5, 0.0);
        p.exponential_ramp_to_value_at_time(0.0, 1.0);
        assert_eq!(p.value_at(0.5), 0.5);
        assert_eq!(p.value_at(1.0), 0.0);
    }

    #[test]
    fn cancel_drops_future_events() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 0.0);
        p.linear_ramp_to_value_at_time(1.0, 1.0);
        p.linear_ramp_to_value_at_time(0.0, 2.0);
        p.cancel_scheduled_values(1.5);
        assert_eq!(p.last_event_time(), Some(1.0));
        assert_eq!(p.value_at(5.0), 1.0);

        p.cancel_scheduled_values(0.0);
        assert!(!p.has_events());
        assert_eq!(p.value_at(5.0), 0.0);
    }

    #[test]
    fn set_value_at_same_time_as_ramp_end() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 0.0);
        p.linear_ramp_to_value_at_time(0.8, 0.1);
        p.set_value_at_time(0.8, 0.1);
        p.linear_ramp_to_value_at_time(0.0, 0.2);
        assert!((p.value_at(0.15) - 0.4).abs() < 1e-12);
        assert_eq!(p.value_at(0.2), 0.0);
    }
}
