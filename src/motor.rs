use serde::{Deserialize, Serialize};

use crate::network::Registry;
use crate::{hash, Result, TotemModule};

const WHEEL_FL: usize = 0;
const WHEEL_FR: usize = 1;
const WHEEL_RL: usize = 2;
const WHEEL_RR: usize = 3;

// Wheel commands that ride the packed motorABCD update, with their brake forms
const CMD_MOTOR_A: u32 = hash::fnv1a("motorA");
const CMD_MOTOR_B: u32 = hash::fnv1a("motorB");
const CMD_MOTOR_C: u32 = hash::fnv1a("motorC");
const CMD_MOTOR_D: u32 = hash::fnv1a("motorD");
const CMD_MOTOR_A_BRAKE: u32 = hash::fnv1a("motorA/brake");
const CMD_MOTOR_B_BRAKE: u32 = hash::fnv1a("motorB/brake");
const CMD_MOTOR_C_BRAKE: u32 = hash::fnv1a("motorC/brake");
const CMD_MOTOR_D_BRAKE: u32 = hash::fnv1a("motorD/brake");
const CMD_MOTOR_ABCD: u32 = hash::fnv1a("motorABCD");
const CMD_MOTOR_ABCD_BRAKE: u32 = hash::fnv1a("motorABCD/brake");

/// Per-wheel motor calibration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WheelConfig {
    /// Output at the lowest non-zero drive
    pub min_power: i8,
    /// Output at full drive
    pub max_power: i8,
    /// Flips the sign of the emitted power
    pub invert: bool,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            min_power: 1,
            max_power: 100,
            invert: false,
        }
    }
}

/// Servo channel calibration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServoConfig {
    pub min_pos: i8,
    pub center_pos: i8,
    pub max_pos: i8,
    pub invert: bool,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            min_pos: -100,
            center_pos: 0,
            max_pos: 100,
            invert: false,
        }
    }
}

struct Motor {
    cmd_power: u32,
    cmd_brake: u32,
    config: WheelConfig,
    power: i8,
    brake: i8,
    power_computed: i8,
    brake_computed: i8,
    // A..D slot in the packed update, None for custom commands
    channel: Option<usize>,
}

struct Servo {
    command: u32,
    config: ServoConfig,
    pos_computed: i8,
}

/// Translates `(drive, turn)` requests into per-wheel power commands.
///
/// Each wheel carries min/max/invert calibration and an independent brake value. When all
/// wheels use the `motorA..motorD` commands, changed powers go out as a single packed
/// `motorABCD` write; any custom command switches the driver to per-wheel updates.
pub struct MotorDriver {
    module: TotemModule,
    motors: [Option<Motor>; 4],
    servos: [Option<Servo>; 3],
    turn_intensity: u8,
    single_command: bool,
}

impl MotorDriver {
    pub fn new(registry: &Registry) -> Self {
        Self {
            module: TotemModule::new(registry, 0, 0),
            motors: [None, None, None, None],
            servos: [None, None, None],
            turn_intensity: 100,
            single_command: true,
        }
    }

    /// Points the driver at a specific board module.
    pub fn set_module(&self, number: u8, serial: u16) {
        self.module.set_number(number);
        self.module.set_serial(serial);
    }

    /// Gets the module control object behind the driver.
    pub fn module(&self) -> &TotemModule {
        &self.module
    }

    /// Sets the sensitivity of turning: 0 gentle, 100 aggressive.
    pub fn set_turn_intensity(&mut self, intensity: i32) {
        self.turn_intensity = intensity.clamp(0, 100) as u8;
    }

    /// Configures the front left wheel motor.
    pub fn add_front_left(&mut self, command: &str, config: WheelConfig) {
        self.add_wheel(WHEEL_FL, command, config);
    }

    /// Configures the front right wheel motor.
    pub fn add_front_right(&mut self, command: &str, config: WheelConfig) {
        self.add_wheel(WHEEL_FR, command, config);
    }

    /// Configures the rear left wheel motor.
    pub fn add_rear_left(&mut self, command: &str, config: WheelConfig) {
        self.add_wheel(WHEEL_RL, command, config);
    }

    /// Configures the rear right wheel motor.
    pub fn add_rear_right(&mut self, command: &str, config: WheelConfig) {
        self.add_wheel(WHEEL_RR, command, config);
    }

    /// Configures a servo channel.
    pub fn add_servo(&mut self, channel: usize, command: &str, config: ServoConfig) {
        if let Some(slot) = self.servos.get_mut(channel) {
            *slot = Some(Servo {
                command: hash::fnv1a(command),
                config,
                pos_computed: 0,
            });
        }
    }

    /// Applies a drive/turn request to all configured wheels.
    pub fn drive(&mut self, drive: i32, turn: i32) -> Result<()> {
        let drive = drive.clamp(-100, 100);
        let turn = turn.clamp(-100, 100);

        // Turning response grows with forward speed up to the configured intensity
        let intensity =
            self.turn_intensity as i32 + ((100 - self.turn_intensity as i32) * drive.abs() / 100);
        let turn = turn * intensity / 100;

        let left = (drive + turn).clamp(-100, 100) as i8;
        let right = (drive - turn).clamp(-100, 100) as i8;

        self.set_power(WHEEL_FL, left);
        self.set_power(WHEEL_RL, left);
        self.set_power(WHEEL_FR, right);
        self.set_power(WHEEL_RR, right);

        self.update_motors()
    }

    /// Brakes individual wheels, `0..=100` each.
    pub fn brake(&mut self, fl: i32, fr: i32, rl: i32, rr: i32) -> Result<()> {
        self.set_brake(WHEEL_FL, fl);
        self.set_brake(WHEEL_FR, fr);
        self.set_brake(WHEEL_RL, rl);
        self.set_brake(WHEEL_RR, rr);

        self.update_motors()
    }

    /// Brakes all wheels.
    pub fn brake_all(&mut self, power: i32) -> Result<()> {
        self.brake(power, power, power, power)
    }

    /// Brakes the front wheels, leaving the rear ones as they are.
    pub fn brake_front(&mut self, power: i32) -> Result<()> {
        let rl = self.current_brake(WHEEL_RL);
        let rr = self.current_brake(WHEEL_RR);
        self.brake(power, power, rl, rr)
    }

    /// Brakes the rear wheels, leaving the front ones as they are.
    pub fn brake_rear(&mut self, power: i32) -> Result<()> {
        let fl = self.current_brake(WHEEL_FL);
        let fr = self.current_brake(WHEEL_FR);
        self.brake(fl, fr, power, power)
    }

    /// Moves a servo arm to `position` in `[-100, 100]`.
    pub fn move_servo(&mut self, channel: usize, position: i32) -> Result<()> {
        let servo = match self.servos.get_mut(channel) {
            Some(Some(servo)) => servo,
            _ => return Ok(()),
        };

        let mut position = position.clamp(-100, 100);
        if servo.config.invert {
            position = -position;
        }

        let config = servo.config;
        let computed = if position < 0 {
            map(
                position,
                -100,
                -1,
                config.min_pos as i32,
                config.center_pos as i32 - 1,
            )
        } else if position > 0 {
            map(
                position,
                1,
                100,
                config.center_pos as i32 + 1,
                config.max_pos as i32,
            )
        } else {
            config.center_pos as i32
        } as i8;

        if computed != servo.pos_computed {
            servo.pos_computed = computed;
            self.module.write_value(servo.command, computed as i32)?;
        }

        Ok(())
    }

    fn add_wheel(&mut self, wheel: usize, command: &str, config: WheelConfig) {
        let cmd_power = hash::fnv1a(command);

        let (channel, cmd_brake) = match cmd_power {
            CMD_MOTOR_A => (Some(0), CMD_MOTOR_A_BRAKE),
            CMD_MOTOR_B => (Some(1), CMD_MOTOR_B_BRAKE),
            CMD_MOTOR_C => (Some(2), CMD_MOTOR_C_BRAKE),
            CMD_MOTOR_D => (Some(3), CMD_MOTOR_D_BRAKE),
            _ => {
                // Custom commands cannot ride the packed update
                self.single_command = false;
                (None, 0)
            }
        };

        self.motors[wheel] = Some(Motor {
            cmd_power,
            cmd_brake,
            config,
            power: 0,
            brake: 0,
            power_computed: 0,
            brake_computed: 0,
            channel,
        });
    }

    fn set_power(&mut self, wheel: usize, power: i8) {
        if let Some(motor) = self.motors[wheel].as_mut() {
            motor.power = power;
        }
    }

    fn set_brake(&mut self, wheel: usize, brake: i32) {
        if let Some(motor) = self.motors[wheel].as_mut() {
            motor.brake = brake.clamp(0, 100) as i8;
        }
    }

    fn current_brake(&self, wheel: usize) -> i32 {
        self.motors[wheel].as_ref().map(|m| m.brake as i32).unwrap_or(0)
    }

    fn update_motors(&mut self) -> Result<()> {
        let mut power_changed = false;
        let mut brake_changed = false;

        for motor in self.motors.iter_mut().flatten() {
            let mut power = motor.power as i32;
            let mut brake = motor.brake as i32;

            if power != 0 {
                let negative = power < 0;
                power = power.abs();
                if brake >= power {
                    // Braking harder than accelerating stops the wheel
                    power = 0;
                } else if brake != 0 {
                    power -= brake;
                    brake = 0;
                }
                if power != 0 {
                    power = map(
                        power,
                        1,
                        100,
                        motor.config.min_power as i32,
                        motor.config.max_power as i32,
                    );
                    if negative {
                        power = -power;
                    }
                    if motor.config.invert {
                        power = -power;
                    }
                }
            }

            let power = power as i8;
            let brake = brake as i8;

            if power != motor.power_computed {
                power_changed = true;
                motor.power_computed = power;
                if !self.single_command {
                    self.module.write_value(motor.cmd_power, power as i32)?;
                }
            }
            if brake != motor.brake_computed {
                brake_changed = true;
                motor.brake_computed = brake;
                if !self.single_command && motor.cmd_brake != 0 {
                    self.module.write_value(motor.cmd_brake, brake as i32)?;
                }
            }
        }

        if self.single_command && power_changed {
            let values = self.channel_values(|motor| motor.power_computed);
            self.module.write_packed(CMD_MOTOR_ABCD, values)?;
        }
        if self.single_command && brake_changed {
            let values = self.channel_values(|motor| motor.brake_computed);
            self.module.write_packed(CMD_MOTOR_ABCD_BRAKE, values)?;
        }

        Ok(())
    }

    fn channel_values(&self, pick: impl Fn(&Motor) -> i8) -> [i8; 4] {
        let mut values = [0i8; 4];
        for motor in self.motors.iter().flatten() {
            if let Some(channel) = motor.channel {
                values[channel] = pick(motor);
            }
        }
        values
    }
}

// Integer range remap, truncating like the board firmware does
fn map(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
