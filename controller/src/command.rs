//! The `$` system-command dispatcher.
//!
//! Consumes one uppercased, trimmed line at a time (the protocol layer
//! normalizes case and strips EOL) and returns a protocol status. Commands
//! that mutate persistent state or start motion are gated on a quiet
//! machine; queries run almost anywhere.

use tracing::warn;

use crate::external::{Feedback, GcodeExecutor, HomingCycle, MachineControl, Reporter};
use crate::machine::{Machine, RESTORE_ALL, RESTORE_DEFAULTS, RESTORE_PARAMETERS};
use crate::persist::{StoreError, EEPROM_LINE_SIZE, N_STARTUP_LINE};
use crate::realtime::EXEC_SLEEP;
use crate::state::MachineState;
use crate::status::Status;

/// What the shared `<n>=<tail>` grammar is storing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreTarget {
    GlobalSetting,
    StartupLine,
}

/// Parse a leading float out of `input`, returning the value and the rest.
///
/// Accepts an optional sign, digits, and at most one decimal point; no
/// exponents, matching the firmware number grammar.
fn parse_float(input: &str) -> Option<(f64, &str)> {
    let bytes = input.as_bytes();
    let mut idx = usize::from(matches!(bytes.first(), Some(b'+') | Some(b'-')));
    let mut seen_digit = false;
    let mut seen_dot = false;
    while idx < bytes.len() {
        match bytes[idx] {
            b'0'..=b'9' => {
                seen_digit = true;
                idx += 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                idx += 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return None;
    }
    let value = input[..idx].parse::<f64>().ok()?;
    Some((value, &input[idx..]))
}

impl Machine {
    /// Execute one `$`-prefixed system line.
    ///
    /// Returns the protocol status; all output happens through `report`.
    /// No side effect survives a non-[`Status::Ok`] return except where the
    /// underlying hardware action itself failed midway (homing).
    pub fn execute_line(
        &mut self,
        line: &str,
        gcode: &mut dyn GcodeExecutor,
        report: &mut dyn Reporter,
        control: &mut dyn MachineControl,
    ) -> Status {
        let Some(body) = line.strip_prefix('$') else {
            return Status::InvalidStatement;
        };

        match body.as_bytes().first().copied() {
            None => {
                report.help();
                Status::Ok
            }
            Some(b'J') => {
                if !self.state.allows_jog() {
                    return Status::IdleError;
                }
                if body.as_bytes().get(1) != Some(&b'=') {
                    return Status::InvalidStatement;
                }
                // The parser recognizes the `$J=` prefix itself.
                gcode.execute(line)
            }
            Some(b'$' | b'G' | b'C' | b'X') if body.len() == 1 => match body.as_bytes()[0] {
                b'$' => {
                    if self.state.blocks_settings_report() {
                        Status::IdleError
                    } else {
                        report.settings(&self.settings);
                        Status::Ok
                    }
                }
                b'G' => {
                    report.gcode_modes();
                    Status::Ok
                }
                b'C' => self.toggle_check_mode(report),
                b'X' => self.unlock_alarm(report, control),
                _ => unreachable!(),
            },
            Some(b'$' | b'G' | b'C' | b'X') => Status::InvalidStatement,
            Some(_) => {
                // Everything below touches persistent state or motion.
                if !self.state.accepts_system_commands() {
                    return Status::IdleError;
                }
                self.execute_gated(body, gcode, report, control)
            }
        }
    }

    fn toggle_check_mode(&mut self, report: &mut dyn Reporter) -> Status {
        match self.state {
            MachineState::CheckMode => {
                // Leaving check mode rebuilds parser state via a reset.
                self.request_reset();
                report.feedback(Feedback::CheckModeDisabled);
                Status::Ok
            }
            MachineState::Idle => {
                self.state = MachineState::CheckMode;
                report.feedback(Feedback::CheckModeEnabled);
                Status::Ok
            }
            _ => Status::IdleError,
        }
    }

    fn unlock_alarm(&mut self, report: &mut dyn Reporter, control: &dyn MachineControl) -> Status {
        if self.state == MachineState::Alarm {
            if control.safety_door_ajar() {
                return Status::CheckDoor;
            }
            report.feedback(Feedback::AlarmUnlocked);
            self.state = MachineState::Idle;
            // The startup script deliberately does not run on unlock;
            // stored motion must not fire out of an alarm.
        }
        Status::Ok
    }

    fn execute_gated(
        &mut self,
        body: &str,
        gcode: &mut dyn GcodeExecutor,
        report: &mut dyn Reporter,
        control: &mut dyn MachineControl,
    ) -> Status {
        match body.as_bytes()[0] {
            b'|' => {
                report.eeprom_dump(&self.store.snapshot());
                Status::Ok
            }
            b'#' => {
                if body.len() != 1 {
                    Status::InvalidStatement
                } else {
                    report.ngc_parameters();
                    Status::Ok
                }
            }
            b'H' => self.run_homing(body, gcode, report, control),
            b'S' => {
                if body != "SLP" {
                    return Status::InvalidStatement;
                }
                self.flags.set_state(EXEC_SLEEP);
                control.motors_disabled();
                Status::Ok
            }
            b'I' => self.handle_build_info(body, report),
            b'R' => {
                if body.len() != 5 || !body.starts_with("RST=") {
                    return Status::InvalidStatement;
                }
                let mask = match body.as_bytes()[4] {
                    b'$' => RESTORE_DEFAULTS,
                    b'#' => RESTORE_PARAMETERS,
                    b'*' => RESTORE_ALL,
                    _ => return Status::InvalidStatement,
                };
                self.restore(mask);
                report.feedback(Feedback::RestoringDefaults);
                // Force a reset so every consumer re-reads the settings.
                self.request_reset();
                Status::Ok
            }
            b'N' => {
                if body.len() == 1 {
                    for slot in 0..N_STARTUP_LINE as u8 {
                        match self.store.read_startup_line(slot) {
                            Err(_) => report.status(Status::SettingReadFail),
                            Ok(line) => report.startup_line(slot, &line),
                        }
                    }
                    Status::Ok
                } else {
                    // Storing motion is only allowed with nothing pending;
                    // alarm state would let a stored move fire blind later.
                    if self.state != MachineState::Idle {
                        return Status::IdleError;
                    }
                    self.store_numbered(&body[1..], StoreTarget::StartupLine, gcode)
                }
            }
            _ => self.store_numbered(body, StoreTarget::GlobalSetting, gcode),
        }
    }

    fn run_homing(
        &mut self,
        body: &str,
        gcode: &mut dyn GcodeExecutor,
        report: &mut dyn Reporter,
        control: &mut dyn MachineControl,
    ) -> Status {
        if !self.settings.homing_enabled() {
            return Status::SettingDisabled;
        }
        if control.safety_door_ajar() {
            return Status::CheckDoor;
        }
        let cycle = match body {
            "H" => HomingCycle::All,
            "HX" => HomingCycle::X,
            "HY" => HomingCycle::Y,
            "HZ" => HomingCycle::Z,
            _ => return Status::InvalidStatement,
        };

        self.state = MachineState::Homing;
        control.homing_cycle(cycle);

        // A soft reset during the cycle leaves the transition to the
        // protocol layer; finishing it here would mask the abort.
        if !self.aborted() {
            self.state = MachineState::Idle;
            control.steppers_idle();
            if cycle == HomingCycle::All {
                self.execute_startup(gcode, report);
            }
        }
        Status::Ok
    }

    fn handle_build_info(&mut self, body: &str, report: &mut dyn Reporter) -> Status {
        if body.len() == 1 {
            return match self.store.read_build_info() {
                Ok(info) => {
                    report.build_info(&info);
                    Status::Ok
                }
                Err(_) => Status::SettingReadFail,
            };
        }
        let Some(info) = body.strip_prefix("I=") else {
            return Status::InvalidStatement;
        };
        match self.store.write_build_info(info) {
            Ok(()) => Status::Ok,
            Err(StoreError::LineTooLong) => Status::LineLengthExceeded,
            Err(err) => {
                warn!("failed to store build info: {err}");
                Status::SettingReadFail
            }
        }
    }

    /// Shared tail of `$<n>=<value>` and `$N<n>=<line>`.
    fn store_numbered(
        &mut self,
        input: &str,
        target: StoreTarget,
        gcode: &mut dyn GcodeExecutor,
    ) -> Status {
        let Some((parameter, rest)) = parse_float(input) else {
            return Status::BadNumberFormat;
        };
        let Some(tail) = rest.strip_prefix('=') else {
            return Status::InvalidStatement;
        };

        match target {
            StoreTarget::StartupLine => {
                if tail.len() + 1 > EEPROM_LINE_SIZE {
                    return Status::LineLengthExceeded;
                }
                // Dry-run the block through the parser; a line that does
                // not parse today must not replay at the next boot.
                let status = gcode.execute(tail);
                if status != Status::Ok {
                    return status;
                }
                match self.store.write_startup_line(parameter as u8, tail) {
                    Ok(()) => Status::Ok,
                    Err(StoreError::LineTooLong) => Status::LineLengthExceeded,
                    Err(_) => Status::InvalidStatement,
                }
            }
            StoreTarget::GlobalSetting => {
                let Some((value, after)) = parse_float(tail) else {
                    return Status::BadNumberFormat;
                };
                if !after.is_empty() || parameter > 255.0 {
                    return Status::InvalidStatement;
                }
                let status = self.settings.store_global(parameter as u8, value as f32);
                if status != Status::Ok {
                    return status;
                }
                if let Err(err) = self.store.write_settings(&self.settings) {
                    warn!("failed to persist settings: {err}");
                    return Status::SettingReadFail;
                }
                Status::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::EepromImage;
    use crate::realtime::EXEC_RESET;
    use crate::settings::BITFLAG_HOMING_ENABLE;
    use crate::X_AXIS;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum Event {
        Help,
        Settings,
        GcodeModes,
        NgcParameters,
        BuildInfo(String),
        StartupLine(u8, String),
        StartupResult(String, Status),
        Status(Status),
        Feedback(Feedback),
        EepromDump(usize),
    }

    #[derive(Default)]
    struct MockReporter {
        events: Vec<Event>,
    }

    impl Reporter for MockReporter {
        fn help(&mut self) {
            self.events.push(Event::Help);
        }
        fn settings(&mut self, _settings: &crate::settings::Settings) {
            self.events.push(Event::Settings);
        }
        fn gcode_modes(&mut self) {
            self.events.push(Event::GcodeModes);
        }
        fn ngc_parameters(&mut self) {
            self.events.push(Event::NgcParameters);
        }
        fn build_info(&mut self, line: &str) {
            self.events.push(Event::BuildInfo(line.to_string()));
        }
        fn startup_line(&mut self, slot: u8, line: &str) {
            self.events.push(Event::StartupLine(slot, line.to_string()));
        }
        fn startup_result(&mut self, line: &str, status: Status) {
            self.events.push(Event::StartupResult(line.to_string(), status));
        }
        fn status(&mut self, status: Status) {
            self.events.push(Event::Status(status));
        }
        fn feedback(&mut self, message: Feedback) {
            self.events.push(Event::Feedback(message));
        }
        fn eeprom_dump(&mut self, image: &[u8]) {
            self.events.push(Event::EepromDump(image.len()));
        }
    }

    #[derive(Default)]
    struct MockGcode {
        lines: Vec<String>,
        response: Option<Status>,
    }

    impl GcodeExecutor for MockGcode {
        fn execute(&mut self, line: &str) -> Status {
            self.lines.push(line.to_string());
            self.response.unwrap_or(Status::Ok)
        }
    }

    #[derive(Default)]
    struct MockControl {
        door_ajar: bool,
        homed: Vec<HomingCycle>,
        idle_calls: usize,
        disable_calls: usize,
        abort_on_homing: Option<Arc<AtomicBool>>,
    }

    impl MachineControl for MockControl {
        fn homing_cycle(&mut self, cycle: HomingCycle) {
            self.homed.push(cycle);
            if let Some(abort) = &self.abort_on_homing {
                abort.store(true, Ordering::SeqCst);
            }
        }
        fn steppers_idle(&mut self) {
            self.idle_calls += 1;
        }
        fn motors_disabled(&mut self) {
            self.disable_calls += 1;
        }
        fn safety_door_ajar(&self) -> bool {
            self.door_ajar
        }
    }

    struct Harness {
        machine: Machine,
        gcode: MockGcode,
        report: MockReporter,
        control: MockControl,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                machine: Machine::new(Box::new(EepromImage::erased())),
                gcode: MockGcode::default(),
                report: MockReporter::default(),
                control: MockControl::default(),
            }
        }

        fn run(&mut self, line: &str) -> Status {
            self.machine
                .execute_line(line, &mut self.gcode, &mut self.report, &mut self.control)
        }
    }

    #[test]
    fn bare_dollar_prints_help() {
        let mut h = Harness::new();
        assert_eq!(h.run("$"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::Help]);
    }

    #[test]
    fn numeric_setting_stores_and_persists() {
        let mut h = Harness::new();
        assert_eq!(h.run("$120=250"), Status::Ok);
        assert_eq!(h.machine.settings.acceleration[X_AXIS], 250.0 * 3600.0);
        // The record went to the store, not just memory.
        assert_eq!(
            h.machine.store.read_settings().unwrap().acceleration[X_AXIS],
            250.0 * 3600.0
        );
    }

    #[test]
    fn numeric_setting_grammar_errors() {
        let mut h = Harness::new();
        assert_eq!(h.run("$ABC"), Status::BadNumberFormat);
        assert_eq!(h.run("$120"), Status::InvalidStatement);
        assert_eq!(h.run("$120="), Status::BadNumberFormat);
        assert_eq!(h.run("$120=250X"), Status::InvalidStatement);
        assert_eq!(h.run("$300=5"), Status::InvalidStatement);
        assert_eq!(h.run("$45=-1"), Status::NegativeValue);
    }

    #[test]
    fn settings_report_blocked_while_streaming() {
        let mut h = Harness::new();
        for state in [MachineState::Cycle, MachineState::Hold] {
            h.machine.state = state;
            assert_eq!(h.run("$$"), Status::IdleError);
            assert!(h.report.events.is_empty());
        }
        h.machine.state = MachineState::Idle;
        assert_eq!(h.run("$$"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::Settings]);
    }

    #[test]
    fn single_letter_commands_take_no_argument() {
        let mut h = Harness::new();
        assert_eq!(h.run("$G1"), Status::InvalidStatement);
        assert_eq!(h.run("$XY"), Status::InvalidStatement);
        assert_eq!(h.run("$G"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::GcodeModes]);
    }

    #[test]
    fn jog_requires_idle_or_jog() {
        let mut h = Harness::new();
        h.machine.state = MachineState::Cycle;
        assert_eq!(h.run("$J=G91X10F100"), Status::IdleError);
        assert!(h.gcode.lines.is_empty());

        h.machine.state = MachineState::Jog;
        assert_eq!(h.run("$J=G91X10F100"), Status::Ok);
        // The parser gets the whole line, prefix included.
        assert_eq!(h.gcode.lines, vec!["$J=G91X10F100"]);

        assert_eq!(h.run("$JG0"), Status::InvalidStatement);
    }

    #[test]
    fn check_mode_toggles_and_forces_reset_on_exit() {
        let mut h = Harness::new();
        assert_eq!(h.run("$C"), Status::Ok);
        assert_eq!(h.machine.state, MachineState::CheckMode);
        assert_eq!(h.report.events, vec![Event::Feedback(Feedback::CheckModeEnabled)]);

        assert_eq!(h.run("$C"), Status::Ok);
        assert_ne!(h.machine.flags.state() & EXEC_RESET, 0);
        assert!(h.machine.aborted());
        h.machine.reset();
        assert_eq!(h.machine.state, MachineState::Idle);
    }

    #[test]
    fn check_mode_requires_idle() {
        let mut h = Harness::new();
        for state in [MachineState::Alarm, MachineState::Hold, MachineState::Cycle] {
            h.machine.state = state;
            assert_eq!(h.run("$C"), Status::IdleError);
            assert_eq!(h.machine.state, state);
        }
    }

    #[test]
    fn alarm_unlock_respects_the_door() {
        let mut h = Harness::new();
        h.machine.state = MachineState::Alarm;
        h.control.door_ajar = true;
        assert_eq!(h.run("$X"), Status::CheckDoor);
        assert_eq!(h.machine.state, MachineState::Alarm);

        h.control.door_ajar = false;
        assert_eq!(h.run("$X"), Status::Ok);
        assert_eq!(h.machine.state, MachineState::Idle);
        assert_eq!(h.report.events, vec![Event::Feedback(Feedback::AlarmUnlocked)]);

        // Outside alarm it is a silent no-op.
        h.report.events.clear();
        assert_eq!(h.run("$X"), Status::Ok);
        assert!(h.report.events.is_empty());
    }

    #[test]
    fn gated_commands_refuse_busy_states() {
        let mut h = Harness::new();
        for state in [MachineState::Cycle, MachineState::Homing, MachineState::Jog] {
            h.machine.state = state;
            assert_eq!(h.run("$#"), Status::IdleError);
            assert_eq!(h.run("$H"), Status::IdleError);
            assert_eq!(h.run("$SLP"), Status::IdleError);
        }
    }

    #[test]
    fn homing_requires_the_setting() {
        let mut h = Harness::new();
        assert_eq!(h.run("$H"), Status::SettingDisabled);
        assert_eq!(h.machine.state, MachineState::Idle);
        assert!(h.control.homed.is_empty());
    }

    #[test]
    fn homing_blocked_by_open_door() {
        let mut h = Harness::new();
        h.machine.settings.flags |= BITFLAG_HOMING_ENABLE;
        h.machine.state = MachineState::Alarm;
        h.control.door_ajar = true;
        assert_eq!(h.run("$H"), Status::CheckDoor);
        assert_eq!(h.machine.state, MachineState::Alarm);
    }

    #[test]
    fn full_homing_replays_startup_script() {
        let mut h = Harness::new();
        h.machine.settings.flags |= BITFLAG_HOMING_ENABLE;
        h.machine.store.write_startup_line(0, "G21 G90").unwrap();

        assert_eq!(h.run("$H"), Status::Ok);
        assert_eq!(h.machine.state, MachineState::Idle);
        assert_eq!(h.control.homed, vec![HomingCycle::All]);
        assert_eq!(h.control.idle_calls, 1);
        assert_eq!(h.gcode.lines, vec!["G21 G90"]);
        assert_eq!(
            h.report.events,
            vec![Event::StartupResult("G21 G90".into(), Status::Ok)]
        );
    }

    #[test]
    fn single_axis_homing_skips_startup() {
        let mut h = Harness::new();
        h.machine.settings.flags |= BITFLAG_HOMING_ENABLE;
        h.machine.store.write_startup_line(0, "G21").unwrap();

        assert_eq!(h.run("$HZ"), Status::Ok);
        assert_eq!(h.control.homed, vec![HomingCycle::Z]);
        assert!(h.gcode.lines.is_empty());

        assert_eq!(h.run("$HXY"), Status::InvalidStatement);
    }

    #[test]
    fn aborted_homing_skips_the_idle_transition() {
        let mut h = Harness::new();
        h.machine.settings.flags |= BITFLAG_HOMING_ENABLE;
        h.control.abort_on_homing = Some(h.machine.abort_flag());

        assert_eq!(h.run("$H"), Status::Ok);
        assert_eq!(h.machine.state, MachineState::Homing);
        assert_eq!(h.control.idle_calls, 0);
        assert!(h.gcode.lines.is_empty());
    }

    #[test]
    fn sleep_raises_flag_and_kills_motors() {
        let mut h = Harness::new();
        assert_eq!(h.run("$SL"), Status::InvalidStatement);
        assert_eq!(h.run("$SLP"), Status::Ok);
        assert_ne!(h.machine.flags.state() & EXEC_SLEEP, 0);
        assert_eq!(h.control.disable_calls, 1);
    }

    #[test]
    fn build_info_reads_and_writes() {
        let mut h = Harness::new();
        assert_eq!(h.run("$I"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::BuildInfo(String::new())]);

        assert_eq!(h.run("$I=shop machine"), Status::Ok);
        h.report.events.clear();
        assert_eq!(h.run("$I"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::BuildInfo("shop machine".into())]);
    }

    #[test]
    fn restore_commands_reset_after_success() {
        let mut h = Harness::new();
        h.run("$46=55");
        assert_eq!(h.machine.settings.sled_weight, 55.0);

        assert_eq!(h.run("$RST=$"), Status::Ok);
        assert_eq!(h.machine.settings.sled_weight, 97.9);
        assert_ne!(h.machine.flags.state() & EXEC_RESET, 0);
        assert!(h.machine.aborted());
        assert_eq!(
            h.report.events,
            vec![Event::Feedback(Feedback::RestoringDefaults)]
        );

        h.machine.reset();
        assert_eq!(h.run("$RST=%"), Status::InvalidStatement);
        assert_eq!(h.run("$RST=#"), Status::Ok);
    }

    #[test]
    fn startup_lines_list_and_store() {
        let mut h = Harness::new();
        assert_eq!(h.run("$N"), Status::Ok);
        assert_eq!(
            h.report.events,
            vec![
                Event::StartupLine(0, String::new()),
                Event::StartupLine(1, String::new()),
            ]
        );

        assert_eq!(h.run("$N0=G54"), Status::Ok);
        // The candidate block was validated through the parser.
        assert_eq!(h.gcode.lines, vec!["G54"]);
        assert_eq!(h.machine.store.read_startup_line(0).unwrap(), "G54");
    }

    #[test]
    fn startup_store_requires_strict_idle() {
        let mut h = Harness::new();
        h.machine.state = MachineState::Alarm;
        // Listing is fine from alarm, storing is not.
        assert_eq!(h.run("$N"), Status::Ok);
        assert_eq!(h.run("$N0=G54"), Status::IdleError);
    }

    #[test]
    fn startup_store_rejects_unparsable_blocks() {
        let mut h = Harness::new();
        h.gcode.response = Some(Status::GcodeUnsupportedCommand);
        assert_eq!(h.run("$N0=G999"), Status::GcodeUnsupportedCommand);
        assert_eq!(h.machine.store.read_startup_line(0).unwrap(), "");
    }

    #[test]
    fn startup_store_bounds() {
        let mut h = Harness::new();
        assert_eq!(h.run("$N9=G0"), Status::InvalidStatement);

        let long = format!("$N0={}", "X".repeat(EEPROM_LINE_SIZE));
        assert_eq!(h.run(&long), Status::LineLengthExceeded);
        // Rejected before it ever reached the parser.
        assert!(h.gcode.lines.is_empty());
    }

    #[test]
    fn eeprom_dump_passes_the_image_through() {
        let mut h = Harness::new();
        assert_eq!(h.run("$|"), Status::Ok);
        assert_eq!(
            h.report.events,
            vec![Event::EepromDump(crate::persist::EEPROM_SIZE)]
        );
    }

    #[test]
    fn ngc_parameter_listing() {
        let mut h = Harness::new();
        assert_eq!(h.run("$#"), Status::Ok);
        assert_eq!(h.report.events, vec![Event::NgcParameters]);
        assert_eq!(h.run("$#2"), Status::InvalidStatement);
    }

    #[test]
    fn parse_float_grammar() {
        assert_eq!(parse_float("120=250"), Some((120.0, "=250")));
        assert_eq!(parse_float("-3.5X"), Some((-3.5, "X")));
        assert_eq!(parse_float(".5"), Some((0.5, "")));
        assert_eq!(parse_float("+7"), Some((7.0, "")));
        assert_eq!(parse_float("1.2.3"), Some((1.2, ".3")));
        assert_eq!(parse_float("=5"), None);
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_float("-"), None);
    }
}
