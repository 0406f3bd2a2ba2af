//! The physical trigger path: a single GPIO button wired to the same
//! `on_trigger` call the MQTT `<room>/scene = START` path uses, so the two
//! trigger sources are provably equivalent. `MockButton` stands in for
//! development and tests where no GPIO header is present.

use std::sync::{Arc, Mutex};

pub trait ButtonDriver: Send + Sync {
    fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync + 'static>);
}

pub struct MockButton {
    callback: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl MockButton {
    pub fn new() -> Self {
        MockButton { callback: Mutex::new(None) }
    }

    /// Simulates a physical press, for tests and dev consoles.
    pub fn press(&self) {
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback();
        }
    }
}

impl Default for MockButton {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonDriver for MockButton {
    fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync + 'static>) {
        *self.callback.lock().unwrap() = Some(Arc::from(callback));
    }
}

#[cfg(target_os = "linux")]
pub use gpio::GpioButton;

#[cfg(target_os = "linux")]
mod gpio {
    use super::ButtonDriver;
    use museum_core::{ControllerError, ControllerResult};
    use rppal::gpio::{Gpio, InputPin, Trigger};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    pub struct GpioButton {
        pin: Mutex<InputPin>,
        debounce: Duration,
    }

    impl GpioButton {
        pub fn new(pin_number: u8, debounce_ms: u64) -> ControllerResult<Self> {
            let gpio = Gpio::new().map_err(|e| ControllerError::Config(format!("gpio init failed: {e}")))?;
            let pin = gpio
                .get(pin_number)
                .map_err(|e| ControllerError::Config(format!("gpio pin {pin_number} unavailable: {e}")))?
                .into_input_pullup();
            Ok(GpioButton {
                pin: Mutex::new(pin),
                debounce: Duration::from_millis(debounce_ms),
            })
        }
    }

    impl ButtonDriver for GpioButton {
        fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync + 'static>) {
            let debounce = self.debounce;
            let last_fire = Arc::new(Mutex::new(Instant::now() - debounce));
            let mut pin = self.pin.lock().unwrap();
            let result = pin.set_async_interrupt(Trigger::FallingEdge, move |_level| {
                let mut last = last_fire.lock().unwrap();
                if last.elapsed() >= debounce {
                    *last = Instant::now();
                    callback();
                }
            });
            if let Err(e) = result {
                museum_core::log_error!("failed to arm GPIO interrupt: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_button_forwards_press_to_callback() {
        let button = MockButton::new();
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = fired.clone();
        button.set_callback(Box::new(move || {
            *fired_clone.lock().unwrap() = true;
        }));
        button.press();
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn mock_button_without_callback_does_not_panic() {
        let button = MockButton::new();
        button.press();
    }
}
