//! Interactive console for the system-command dispatcher.
//!
//! Feeds stdin lines through the dispatcher against an in-memory persisted
//! image, printing protocol responses the way the serial reporter would.
//! G-code lines are accepted and echoed rather than executed; this drives
//! the system layer, not motion.

use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use controller::{
    Feedback, GcodeExecutor, HomingCycle, Machine, MachineControl, MachineState, Reporter,
    Settings, Status,
};

#[derive(Parser, Debug)]
#[command(about = "Drive the system-command dispatcher from a terminal")]
struct Args {
    /// Load a settings snapshot (JSON) instead of defaults.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Report the safety door as open.
    #[arg(long)]
    door_ajar: bool,

    /// Start in the alarm state, as a controller does before homing.
    #[arg(long)]
    alarm: bool,
}

struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn help(&mut self) {
        println!("[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $SLP $C $X $H $RST=$ $RST=# $RST=* $|]");
    }

    fn settings(&mut self, settings: &Settings) {
        match serde_json::to_string_pretty(settings) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("settings serialization failed: {err}"),
        }
    }

    fn gcode_modes(&mut self) {
        println!("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
    }

    fn ngc_parameters(&mut self) {
        println!("[G54:0.000,0.000,0.000]");
    }

    fn build_info(&mut self, line: &str) {
        println!("[VER:1.1:{line}]");
    }

    fn startup_line(&mut self, slot: u8, line: &str) {
        println!("$N{slot}={line}");
    }

    fn startup_result(&mut self, line: &str, status: Status) {
        if status.is_ok() {
            println!(">{line}:ok");
        } else {
            println!(">{line}:error:{}", status.code());
        }
    }

    fn status(&mut self, status: Status) {
        print_status(status);
    }

    fn feedback(&mut self, message: Feedback) {
        let text = match message {
            Feedback::CheckModeEnabled => "Enabled",
            Feedback::CheckModeDisabled => "Disabled",
            Feedback::AlarmUnlocked => "Caution: Unlocked",
            Feedback::RestoringDefaults => "Restoring defaults",
            Feedback::SleepMode => "Sleeping",
        };
        println!("[MSG:{text}]");
    }

    fn eeprom_dump(&mut self, image: &[u8]) {
        for (offset, row) in image.chunks(16).enumerate() {
            let hex: Vec<String> = row.iter().map(|b| format!("{b:02X}")).collect();
            println!("{:04X}: {}", offset * 16, hex.join(" "));
        }
    }
}

fn print_status(status: Status) {
    if status.is_ok() {
        println!("ok");
    } else {
        println!("error:{} ({status})", status.code());
    }
}

/// Accepts every G-code line; this harness exercises the system layer only.
struct EchoGcode;

impl GcodeExecutor for EchoGcode {
    fn execute(&mut self, line: &str) -> Status {
        println!("; gcode accepted: {line}");
        Status::Ok
    }
}

struct StubControl {
    door_ajar: bool,
}

impl MachineControl for StubControl {
    fn homing_cycle(&mut self, cycle: HomingCycle) {
        println!("; homing cycle: {cycle:?}");
    }

    fn steppers_idle(&mut self) {
        println!("; steppers idle");
    }

    fn motors_disabled(&mut self) {
        println!("; motors disabled");
    }

    fn safety_door_ajar(&self) -> bool {
        self.door_ajar
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut machine = Machine::new(Box::new(controller::EepromImage::erased()));
    if let Some(path) = &args.settings {
        let json = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Settings>(&json) {
            Ok(settings) => machine.settings = settings,
            Err(err) => eprintln!("ignoring {}: {err}", path.display()),
        }
    }
    if args.alarm {
        machine.state = MachineState::Alarm;
    }

    let mut gcode = EchoGcode;
    let mut report = ConsoleReporter;
    let mut control = StubControl {
        door_ajar: args.door_ajar,
    };

    // A controller replays the startup script once the boot banner is out.
    println!("Grbl 1.1 ['$' for help]");
    machine.execute_startup(&mut gcode, &mut report);

    for line in io::stdin().lock().lines() {
        let line = line?;
        let trimmed = line.trim().to_ascii_uppercase();
        if trimmed.is_empty() {
            continue;
        }
        let status = if trimmed.starts_with('$') {
            machine.execute_line(&trimmed, &mut gcode, &mut report, &mut control)
        } else {
            gcode.execute(&trimmed)
        };
        print_status(status);

        // Stand in for the protocol layer's reset handling.
        if machine.aborted() {
            machine.reset();
            println!("Grbl 1.1 ['$' for help]");
        }
    }
    Ok(())
}
