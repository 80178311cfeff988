//! Line-oriented serial control of the lab board.
//!
//! The board speaks ASCII lines of the form `LB:<cmd>[:<arg>][:<arg>]\n`. A read is a
//! command with a `?` argument; the board echoes the command name, one separator
//! character and a decimal or hexadecimal number terminated by a newline. There is no
//! framing, no flags and no versioning on this surface.
//!
//! Every read is bounded by the port timeout configured at [open](LabBoard::open);
//! an expired wait surfaces as a timeout error instead of blocking forever.

use std::io::{Read, Write};
use std::time::Duration;

use log::trace;
use serialport::SerialPort;

use crate::{Error, Result};

pub const DEFAULT_BAUD: u32 = 57600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

// Replies are short; anything longer means the stream lost its framing
const MAX_REPLY_LEN: usize = 64;

/// Serial control handle for one lab board.
pub struct LabBoard {
    port: Box<dyn SerialPort>,
}

impl LabBoard {
    /// Opens the board on a serial port path.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud).timeout(timeout).open()?;
        Ok(Self { port })
    }

    /// Wraps an already configured port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Sends one raw command line.
    pub fn send(&mut self, command: &str, args: &[&str]) -> Result<()> {
        let line = format_command(command, args);
        trace!("labboard tx: {}", line.trim_end());
        self.port.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Sends a command with one integer argument.
    pub fn write_value(&mut self, command: &str, value: i32) -> Result<()> {
        self.send(command, &[&value.to_string()])
    }

    /// Reads a decimal value.
    pub fn read_value(&mut self, command: &str) -> Result<i64> {
        self.query(command, 10)
    }

    /// Reads a hexadecimal value.
    pub fn read_value_hex(&mut self, command: &str) -> Result<i64> {
        self.query(command, 16)
    }

    /// Reads the VIN pin voltage, volts.
    pub fn vin(&mut self) -> Result<f32> {
        Ok(self.read_value("IN:VIN")? as f32 / 1000.0)
    }

    /// Reads the ±50 V pin voltage, volts.
    pub fn volt_50v(&mut self) -> Result<f32> {
        Ok(self.read_value("IN:50V")? as f32 / 1000.0)
    }

    /// Reads the ±5 V pin voltage, volts.
    pub fn volt_5v(&mut self) -> Result<f32> {
        Ok(self.read_value("IN:5V")? as f32 / 1000.0)
    }

    /// Reads the ±0.5 V pin voltage, volts.
    pub fn volt_05v(&mut self) -> Result<f32> {
        Ok(self.read_value("IN:05V")? as f32 / 1000.0)
    }

    /// Reads the SHUNT pin current, amps.
    pub fn amp(&mut self) -> Result<f32> {
        Ok(self.read_value("IN:AMP")? as f32)
    }

    /// Sets the VREG output, volts.
    pub fn set_vreg(&mut self, voltage: f32) -> Result<()> {
        self.write_value("OUT:VREG", (voltage * 1000.0) as i32)
    }

    /// Reads the VREG output back, volts.
    pub fn vreg(&mut self) -> Result<f32> {
        Ok(self.read_value("OUT:VREG")? as f32 / 1000.0)
    }

    /// Sets a DAC output (`1..=3`), volts.
    pub fn set_dac(&mut self, channel: u8, voltage: f32) -> Result<()> {
        let command = dac_command(channel)?;
        self.write_value(command, (voltage * 1000.0) as i32)
    }

    /// Reads a DAC output back (`1..=3`), volts.
    pub fn dac(&mut self, channel: u8) -> Result<f32> {
        let command = dac_command(channel)?;
        Ok(self.read_value(command)? as f32 / 1000.0)
    }

    /// Switches one indicator LED.
    pub fn set_led(&mut self, led: u8, on: bool) -> Result<()> {
        self.send("LED", &[&led.to_string(), if on { "1" } else { "0" }])
    }

    /// Reads the LED states as a bitmask.
    pub fn leds(&mut self) -> Result<i64> {
        self.read_value_hex("LED")
    }

    /// Reads the pressed keys as a bitmask.
    pub fn keys(&mut self) -> Result<i64> {
        self.read_value_hex("KEY")
    }

    /// Sets the 7-segment display brightness.
    pub fn set_display_brightness(&mut self, brightness: i32) -> Result<()> {
        self.write_value("DISP:DIM", brightness)
    }

    /// Enables or disables the voltage monitor view on the display.
    pub fn set_display_monitor(&mut self, enabled: bool) -> Result<()> {
        self.write_value("DISP:MON", enabled as i32)
    }

    /// Reads the DIG1 input pin.
    pub fn dig1(&mut self) -> Result<bool> {
        Ok(self.read_value("DIG1")? != 0)
    }

    /// Reads the DIG2 input pin.
    pub fn dig2(&mut self) -> Result<bool> {
        Ok(self.read_value("DIG2")? != 0)
    }

    /// Restarts the board firmware.
    pub fn restart(&mut self) -> Result<()> {
        self.write_value("RST", 1)
    }

    /// Reboots the board into its serial bootloader.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        self.write_value("BOOT", 1)
    }

    fn query(&mut self, command: &str, radix: u32) -> Result<i64> {
        self.send(command, &["?"])?;
        let line = self.read_line()?;
        trace!("labboard rx: {line}");
        parse_reply(&line, command, radix)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(Error::timeout("lab board reply timed out"));
                }
                Err(err) => return Err(err.into()),
            }
            if line.len() > MAX_REPLY_LEN {
                return Err(Error::serial("lab board reply without line ending"));
            }
        }

        let line = String::from_utf8(line).map_err(|_| Error::serial("non-ASCII reply"))?;
        Ok(line.trim_end_matches('\r').to_string())
    }
}

fn dac_command(channel: u8) -> Result<&'static str> {
    match channel {
        1 => Ok("OUT:DAC1"),
        2 => Ok("OUT:DAC2"),
        3 => Ok("OUT:DAC3"),
        _ => Err(Error::failure(format!("no DAC channel {channel}"))),
    }
}

fn format_command(command: &str, args: &[&str]) -> String {
    let mut line = format!("LB:{command}");
    for arg in args {
        line.push(':');
        line.push_str(arg);
    }
    line.push('\n');
    line
}

// The reply carries the command name, one separator character, then the number
fn parse_reply(line: &str, command: &str, radix: u32) -> Result<i64> {
    let start = line
        .find(command)
        .ok_or_else(|| Error::serial(format!("reply does not echo {command}")))?;
    let rest = &line[start + command.len()..];
    let number = rest.get(1..).unwrap_or("");

    let number: &str = number.trim();
    let (digits, sign) = match number.strip_prefix('-') {
        Some(digits) => (digits, -1),
        None => (number, 1),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(Error::serial(format!("unparseable reply: {line}")));
    }

    let value = i64::from_str_radix(&digits[..end], radix)
        .map_err(|err| Error::serial(format!("unparseable reply: {err}")))?;
    Ok(value * sign)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        assert_eq!(format_command("IN:VIN", &["?"]), "LB:IN:VIN:?\n");
        assert_eq!(format_command("OUT:DAC1", &["3250"]), "LB:OUT:DAC1:3250\n");
        assert_eq!(format_command("LED", &["4", "1"]), "LB:LED:4:1\n");
        assert_eq!(format_command("RST", &[]), "LB:RST\n");
    }

    #[test]
    fn test_parse_decimal_reply() {
        assert_eq!(parse_reply("IN:VIN:12450", "IN:VIN", 10).unwrap(), 12450);
        assert_eq!(parse_reply("IN:50V:-1730", "IN:50V", 10).unwrap(), -1730);
    }

    #[test]
    fn test_parse_hex_reply() {
        assert_eq!(parse_reply("KEY:1f", "KEY", 16).unwrap(), 0x1f);
        assert_eq!(parse_reply("LED:0", "LED", 16).unwrap(), 0);
    }

    #[test]
    fn test_parse_ignores_leading_noise() {
        // A stale fragment may precede the echo
        assert_eq!(parse_reply("xxIN:VIN:5000", "IN:VIN", 10).unwrap(), 5000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_reply("IN:VIN:?", "IN:VIN", 10).is_err());
        assert!(parse_reply("nonsense", "IN:VIN", 10).is_err());
    }
}
