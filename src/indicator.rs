//! Pass/fail reporting

use embedded_hal::digital::v2::OutputPin;

use crate::switch::Report;

/// Something that can show the outcome of a run
pub trait Indicator {
    type Error;

    /// A run has started
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Show the outcome of a finished run
    fn report(&mut self, report: &Report) -> Result<(), Self::Error>;
}

/// Three LEDs: running, passed, failed
///
/// The pins are driven high to light the LED.
pub struct Leds<RUN, PASS, FAIL> {
    running: RUN,
    pass: PASS,
    fail: FAIL,
}

impl<RUN, PASS, FAIL, E> Leds<RUN, PASS, FAIL>
where
    RUN: OutputPin<Error = E>,
    PASS: OutputPin<Error = E>,
    FAIL: OutputPin<Error = E>,
{
    pub fn new(running: RUN, pass: PASS, fail: FAIL) -> Self {
        Leds { running, pass, fail }
    }

    pub fn release(self) -> (RUN, PASS, FAIL) {
        (self.running, self.pass, self.fail)
    }
}

impl<RUN, PASS, FAIL, E> Indicator for Leds<RUN, PASS, FAIL>
where
    RUN: OutputPin<Error = E>,
    PASS: OutputPin<Error = E>,
    FAIL: OutputPin<Error = E>,
{
    type Error = E;

    fn start(&mut self) -> Result<(), E> {
        self.pass.set_low()?;
        self.fail.set_low()?;
        self.running.set_high()
    }

    fn report(&mut self, report: &Report) -> Result<(), E> {
        self.running.set_low()?;
        if report.passed() {
            self.pass.set_high()
        } else {
            warn!(
                "link check failed: forward {}, reverse {}",
                report.forward,
                report.reverse
            );
            self.fail.set_high()
        }
    }
}
