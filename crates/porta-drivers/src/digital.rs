//! # Digital Drivers
//!
//! Boolean ports backed by `GPIO` pins. A high level reads as `1` and a low
//! level as `0`, unless the driver is inverted, which is useful for
//! active-low wiring such as pull-up buttons.

use alloc::format;

use embedded_hal::digital::{Error as _, InputPin, OutputPin, PinState};

use porta::value::{from_bool, is_true};
use porta::{Error, ErrorKind, Now, PortDriver, Result, Value};

/// Digital input driver.
pub struct DigitalInput<P> {
    pin: P,
    inverted: bool,
}

impl<P: InputPin> DigitalInput<P> {
    /// Creates a [`DigitalInput`] reading the pin level as it is.
    #[must_use]
    pub const fn new(pin: P) -> Self {
        Self {
            pin,
            inverted: false,
        }
    }

    /// Creates a [`DigitalInput`] reading the inverse of the pin level.
    #[must_use]
    pub const fn inverted(pin: P) -> Self {
        Self {
            pin,
            inverted: true,
        }
    }

    /// Releases the pin.
    #[must_use]
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: InputPin + Send> PortDriver for DigitalInput<P> {
    fn read(&mut self, _now: Now) -> Value {
        // A pin that cannot be read has no valid sample.
        self.pin
            .is_high()
            .ok()
            .map(|high| from_bool(high != self.inverted))
    }
}

/// Digital output driver.
pub struct DigitalOutput<P> {
    pin: P,
    level: Option<bool>,
}

impl<P: OutputPin> DigitalOutput<P> {
    /// Creates a [`DigitalOutput`].
    ///
    /// The level stays unknown until the first write.
    #[must_use]
    pub const fn new(pin: P) -> Self {
        Self { pin, level: None }
    }

    /// Releases the pin.
    #[must_use]
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin + Send> PortDriver for DigitalOutput<P> {
    fn read(&mut self, _now: Now) -> Value {
        self.level.map(from_bool)
    }

    fn write(&mut self, value: f64) -> Result<()> {
        let high = is_true(value);
        self.pin.set_state(PinState::from(high)).map_err(|e| {
            Error::new(
                ErrorKind::Driver,
                format!("Error setting the pin level: {:?}", e.kind()),
            )
        })?;
        self.level = Some(high);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;

    use embedded_hal_mock::eh1::MockError;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    #[test]
    fn test_input_levels() {
        let expectations = [
            PinTransaction::get(State::High),
            PinTransaction::get(State::Low),
        ];

        let pin = PinMock::new(&expectations);
        let mut input = DigitalInput::new(pin);

        assert_eq!(input.read(Now::default()), Some(1.));
        assert_eq!(input.read(Now::default()), Some(0.));

        input.release().done();
    }

    #[test]
    fn test_inverted_input() {
        let expectations = [PinTransaction::get(State::Low)];

        let pin = PinMock::new(&expectations);
        let mut input = DigitalInput::inverted(pin);

        assert_eq!(input.read(Now::default()), Some(1.));

        input.release().done();
    }

    #[test]
    fn test_input_error_is_undefined() {
        let expectations = [PinTransaction::get(State::High)
            .with_error(MockError::Io(std::io::ErrorKind::NotConnected))];

        let pin = PinMock::new(&expectations);
        let mut input = DigitalInput::new(pin);

        assert_eq!(input.read(Now::default()), None);

        input.release().done();
    }

    #[test]
    fn test_output_writes() {
        let expectations = [
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ];

        let pin = PinMock::new(&expectations);
        let mut output = DigitalOutput::new(pin);
        assert_eq!(output.read(Now::default()), None);

        output.write(5.).unwrap();
        assert_eq!(output.read(Now::default()), Some(1.));

        output.write(0.).unwrap();
        assert_eq!(output.read(Now::default()), Some(0.));

        output.release().done();
    }

    #[test]
    fn test_output_error() {
        let expectations = [PinTransaction::set(State::High)
            .with_error(MockError::Io(std::io::ErrorKind::NotConnected))];

        let pin = PinMock::new(&expectations);
        let mut output = DigitalOutput::new(pin);

        let e = output.write(1.).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Driver);
        assert_eq!(output.read(Now::default()), None);

        output.release().done();
    }
}
