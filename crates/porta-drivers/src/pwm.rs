//! # PWM Driver
//!
//! A numeric output port writing a duty cycle, expressed in percent, to a
//! `PWM` channel.

use alloc::format;

use embedded_hal::pwm::{Error as _, SetDutyCycle};

use porta::{Error, ErrorKind, Now, PortDriver, Result, Value};

/// Maximum duty cycle, in percent.
pub const MAX_PERCENT: f64 = 100.;

/// `PWM` output driver.
pub struct PwmOutput<P> {
    pwm: P,
    percent: Option<u8>,
}

impl<P: SetDutyCycle> PwmOutput<P> {
    /// Creates a [`PwmOutput`].
    #[must_use]
    pub const fn new(pwm: P) -> Self {
        Self { pwm, percent: None }
    }

    /// Releases the `PWM` channel.
    #[must_use]
    pub fn release(self) -> P {
        self.pwm
    }
}

impl<P: SetDutyCycle + Send> PortDriver for PwmOutput<P> {
    fn read(&mut self, _now: Now) -> Value {
        self.percent.map(f64::from)
    }

    fn write(&mut self, value: f64) -> Result<()> {
        if !(0.0..=MAX_PERCENT).contains(&value) {
            return Err(Error::new(
                ErrorKind::Driver,
                format!("Duty cycle {value}% is outside of 0..={MAX_PERCENT}%"),
            ));
        }

        // Always in 0..=100 after the check above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = value.round() as u8;

        self.pwm.set_duty_cycle_percent(percent).map_err(|e| {
            Error::new(
                ErrorKind::Driver,
                format!("Error setting the duty cycle: {:?}", e.kind()),
            )
        })?;
        self.percent = Some(percent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec::Vec;

    use embedded_hal::pwm::{ErrorKind as PwmErrorKind, ErrorType};

    #[derive(Debug)]
    struct Unavailable;

    impl embedded_hal::pwm::Error for Unavailable {
        fn kind(&self) -> PwmErrorKind {
            PwmErrorKind::Other
        }
    }

    #[derive(Default)]
    struct FakePwm {
        duties: Vec<u16>,
        broken: bool,
    }

    impl ErrorType for FakePwm {
        type Error = Unavailable;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(&mut self, duty: u16) -> core::result::Result<(), Self::Error> {
            if self.broken {
                return Err(Unavailable);
            }
            self.duties.push(duty);
            Ok(())
        }
    }

    #[test]
    fn test_write_percent() {
        let mut output = PwmOutput::new(FakePwm::default());
        assert_eq!(output.read(Now::default()), None);

        output.write(0.).unwrap();
        output.write(42.4).unwrap();
        output.write(100.).unwrap();

        assert_eq!(output.read(Now::default()), Some(100.));
        assert_eq!(output.release().duties, [0, 420, 1000]);
    }

    #[test]
    fn test_out_of_range() {
        let mut output = PwmOutput::new(FakePwm::default());

        for value in [-1., 100.5, f64::NAN] {
            let e = output.write(value).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::Driver);
        }
        assert!(output.release().duties.is_empty());
    }

    #[test]
    fn test_channel_error() {
        let mut output = PwmOutput::new(FakePwm {
            broken: true,
            ..FakePwm::default()
        });

        let e = output.write(50.).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Driver);
        assert_eq!(output.read(Now::default()), None);
    }
}
