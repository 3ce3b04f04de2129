// Opaque device contracts for the real-hardware sources
//
// The vendor SDK calls themselves live outside this crate; the acquisition
// code only depends on these traits. An analyzer measurement is started,
// polled until the device reports done, then read back as resistance and
// reactance. A terminal switch routes one excitation/sense pair onto the
// pad.

use std::thread;
use std::time::Duration;

use crate::error::SourceError;

/// Impedance analyzer device handle
///
/// The poll/read discipline mirrors the device state machine: `configure`
/// once after `open`, then per measurement `start_measurement`, `poll_done`
/// until true, `read_rectangular`.
pub trait ImpedanceAnalyzer: Send {
    fn open(&mut self) -> Result<(), SourceError>;

    /// Release the device handle. Safe to call twice.
    fn close(&mut self);

    /// Program excitation frequency and amplitude
    fn configure(&mut self, frequency_hz: f64, amplitude_v: f64) -> Result<(), SourceError>;

    /// Reprogram only the excitation frequency (used by sweeps)
    fn set_frequency(&mut self, frequency_hz: f64) -> Result<(), SourceError>;

    fn start_measurement(&mut self) -> Result<(), SourceError>;

    /// Whether the running measurement has reached the done state
    fn poll_done(&mut self) -> Result<bool, SourceError>;

    /// (resistance [ohm], reactance [ohm]) of the completed measurement
    fn read_rectangular(&mut self) -> Result<(f64, f64), SourceError>;

    fn info(&self) -> String;
}

/// Terminal switch controller handle
pub trait TerminalSwitch: Send {
    fn open(&mut self) -> Result<(), SourceError>;

    /// Release the controller. Safe to call twice.
    fn close(&mut self);

    /// Route the given source/sink channels onto the pad
    fn select(&mut self, source_channel: u8, sink_channel: u8) -> Result<(), SourceError>;

    fn info(&self) -> String;
}

/// Poll the analyzer until done, bounded by the poll budget
///
/// ~500 polls at 10 ms gives the 5 s measurement budget; sweeps use a
/// tighter budget per point.
pub fn wait_until_done(
    analyzer: &mut dyn ImpedanceAnalyzer,
    poll_interval_ms: u64,
    poll_budget: u32,
) -> Result<(), SourceError> {
    for _ in 0..poll_budget {
        if analyzer.poll_done()? {
            return Ok(());
        }
        if poll_interval_ms > 0 {
            thread::sleep(Duration::from_millis(poll_interval_ms));
        }
    }
    Err(SourceError::MeasurementTimeout {
        polls: poll_budget,
    })
}

#[cfg(test)]
pub(crate) mod mock {
    // Scriptable in-memory devices for the hardware-source unit tests

    use super::*;
    use std::collections::HashSet;

    pub struct MockAnalyzer {
        /// Whether open() succeeds
        pub open_ok: bool,
        /// Polls needed before a measurement reports done
        pub polls_until_done: u32,
        /// Frequencies whose measurements never reach done
        pub dead_frequencies: HashSet<u64>,
        pub frequency_hz: f64,
        pub amplitude_v: f64,
        pub opened: bool,
        pub close_count: u32,
        pub measurements_started: u32,
        polls_remaining: u32,
    }

    impl MockAnalyzer {
        pub fn new() -> Self {
            Self {
                open_ok: true,
                polls_until_done: 0,
                dead_frequencies: HashSet::new(),
                frequency_hz: 0.0,
                amplitude_v: 0.0,
                opened: false,
                close_count: 0,
                measurements_started: 0,
                polls_remaining: 0,
            }
        }

        pub fn failing_open() -> Self {
            Self {
                open_ok: false,
                ..Self::new()
            }
        }
    }

    impl ImpedanceAnalyzer for MockAnalyzer {
        fn open(&mut self) -> Result<(), SourceError> {
            if !self.open_ok {
                return Err(SourceError::AnalyzerFailure {
                    details: "device not found".to_string(),
                });
            }
            self.opened = true;
            Ok(())
        }

        fn close(&mut self) {
            self.opened = false;
            self.close_count += 1;
        }

        fn configure(&mut self, frequency_hz: f64, amplitude_v: f64) -> Result<(), SourceError> {
            self.frequency_hz = frequency_hz;
            self.amplitude_v = amplitude_v;
            Ok(())
        }

        fn set_frequency(&mut self, frequency_hz: f64) -> Result<(), SourceError> {
            self.frequency_hz = frequency_hz;
            Ok(())
        }

        fn start_measurement(&mut self) -> Result<(), SourceError> {
            self.measurements_started += 1;
            self.polls_remaining = self.polls_until_done;
            Ok(())
        }

        fn poll_done(&mut self) -> Result<bool, SourceError> {
            if self.dead_frequencies.contains(&(self.frequency_hz as u64)) {
                return Ok(false);
            }
            if self.polls_remaining > 0 {
                self.polls_remaining -= 1;
                return Ok(false);
            }
            Ok(true)
        }

        fn read_rectangular(&mut self) -> Result<(f64, f64), SourceError> {
            // Readings keyed to the programmed frequency so sweep tests can
            // see which points were measured
            Ok((self.frequency_hz, -0.1 * self.frequency_hz))
        }

        fn info(&self) -> String {
            "Mock Analyzer".to_string()
        }
    }

    pub struct MockSwitch {
        pub open_ok: bool,
        pub opened: bool,
        pub close_count: u32,
        /// Shared so tests can observe selections through the boxed trait
        pub selections: std::sync::Arc<std::sync::Mutex<Vec<(u8, u8)>>>,
    }

    impl MockSwitch {
        pub fn new() -> Self {
            Self {
                open_ok: true,
                opened: false,
                close_count: 0,
                selections: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    impl TerminalSwitch for MockSwitch {
        fn open(&mut self) -> Result<(), SourceError> {
            if !self.open_ok {
                return Err(SourceError::SwitchFailure {
                    details: "serial port not found".to_string(),
                });
            }
            self.opened = true;
            Ok(())
        }

        fn close(&mut self) {
            self.opened = false;
            self.close_count += 1;
        }

        fn select(&mut self, source_channel: u8, sink_channel: u8) -> Result<(), SourceError> {
            self.selections
                .lock()
                .unwrap()
                .push((source_channel, sink_channel));
            Ok(())
        }

        fn info(&self) -> String {
            "Mock Switch".to_string()
        }
    }
}
