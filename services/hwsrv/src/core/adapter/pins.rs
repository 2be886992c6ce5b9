//! Logical digital pin → board GPIO translation for HTTP boards
//!
//! WiFi boards are addressed by GPIO number, while devices are wired and
//! configured by their silk-screen `D<n>` label.

use crate::model::{parse_port_key, Command, PinRef};

/// Board-specific pin table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioMap {
    pub board: &'static str,
    table: &'static [(i64, i64)],
    reserved: &'static [i64],
}

/// WeMos D1 R2 (ESP8266): D0..D14 → GPIO
const WEMOS_D1_R2_TABLE: &[(i64, i64)] = &[
    (0, 16),
    (1, 5),
    (2, 4),
    (3, 0),
    (4, 2),
    (5, 14),
    (6, 12),
    (7, 13),
    (8, 15),
    (9, 3),
    (10, 1),
    (11, 9),
    (12, 10),
    (13, 3),
    (14, 1),
];

/// GPIO6..GPIO11 are wired to the SPI flash
const ESP8266_FLASH_GPIOS: &[i64] = &[6, 7, 8, 9, 10, 11];

impl GpioMap {
    pub const WEMOS_D1_R2: GpioMap = GpioMap {
        board: "WeMos_D1_R2",
        table: WEMOS_D1_R2_TABLE,
        reserved: ESP8266_FLASH_GPIOS,
    };

    /// GPIO for a logical digital pin; unmapped pins pass through
    pub fn gpio_for(&self, logical: i64) -> i64 {
        self.table
            .iter()
            .find(|(d, _)| *d == logical)
            .map(|(_, gpio)| *gpio)
            .unwrap_or(logical)
    }

    pub fn is_valid_gpio(&self, gpio: i64) -> bool {
        !self.reserved.contains(&gpio)
    }

    /// Translate one pin field
    ///
    /// Analog keys stay as strings, `D<n>` keys and bare numbers go through
    /// the table.
    pub fn transform_pin(&self, pin: &PinRef) -> PinRef {
        match pin {
            PinRef::Number(n) => PinRef::Number(self.gpio_for(*n)),
            PinRef::Key(key) if key.starts_with('A') => pin.clone(),
            PinRef::Key(key) if key.starts_with('D') => match parse_port_key(key) {
                Ok(n) => PinRef::Number(self.gpio_for(n)),
                Err(_) => pin.clone(),
            },
            PinRef::Key(_) => pin.clone(),
        }
    }

    /// Copy of the command with `pin`, `triggerPin` and `echoPin` translated
    pub fn transform_command(&self, command: &Command) -> Command {
        let mut out = command.clone();
        out.pin = command.pin.as_ref().map(|p| self.transform_pin(p));
        out.trigger_pin = command.trigger_pin.as_ref().map(|p| self.transform_pin(p));
        out.echo_pin = command.echo_pin.as_ref().map(|p| self.transform_pin(p));
        out
    }

    /// Whether a port key resolves to a usable GPIO
    pub fn accepts_port(&self, key: &str) -> bool {
        match self.transform_pin(&PinRef::Key(key.to_string())) {
            PinRef::Number(gpio) => self.is_valid_gpio(gpio),
            PinRef::Key(_) => true,
        }
    }
}
