//! Reference CLI host (SS4.15): loads firmware into a `Board`, runs it headless, and dumps the
//! final LCD framebuffer as a luminance PGM so the simulator is useful without a GUI.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use boardsim_core::board::{Board, BoardWiring, HaltReason, RunOutcome};
use boardsim_core::tracer::TracerEvent;

#[derive(Parser, Debug)]
#[command(name = "boardsim", about = "Cycle-accurate AVR + PCD8544 board simulator")]
struct Args {
    /// MCU variant name.
    #[arg(long, default_value = "atmega32u4")]
    mcu: String,

    /// Base clock frequency in Hz, before any CLKPR division.
    #[arg(short = 'f', long, default_value_t = 16_000_000)]
    frequency: u32,

    /// ELF firmware image to load.
    #[arg(short = 'e', long)]
    elf: Option<PathBuf>,

    /// Intel HEX firmware image to load.
    #[arg(short = 'x', long)]
    hex: Option<PathBuf>,

    /// GDB remote-debug port. Accepted and logged; the wire protocol is not implemented.
    #[arg(short = 'g', long)]
    gdb_port: Option<u16>,

    /// Raise the log verbosity (stackable: -v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Install a tracer that logs only interrupt dispatches.
    #[arg(short = 't', long)]
    trace_interrupts: bool,

    /// Microseconds of simulated time to run before exiting, if firmware never halts on its own.
    #[arg(long, default_value_t = 1_000_000.0)]
    run_for_micros: f64,

    /// Path for the final luminance PGM dump. Defaults to a timestamped file in the working
    /// directory.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Some(port) = args.gdb_port {
        log::warn!("gdb remote-debug port {} requested but not implemented; ignoring", port);
    }

    match run(&args) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(-1);
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let mut board = Board::init(&args.mcu, args.frequency as u64, BoardWiring::Legacy).map_err(|e| e.to_string())?;

    match (&args.elf, &args.hex) {
        (Some(path), _) => {
            let bytes = fs::read(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
            board.load_elf(&bytes).map_err(|e| e.to_string())?;
        }
        (None, Some(path)) => {
            let text = fs::read_to_string(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
            board.load_hex(&text).map_err(|e| e.to_string())?;
        }
        (None, None) => return Err("no firmware given: pass -e/--elf or -x/--hex".to_string()),
    }

    if args.trace_interrupts {
        board.set_tracer(Box::new(|event| {
            if let TracerEvent::Interrupt { vector } = event {
                log::info!("interrupt vector {} dispatched", vector);
            }
        }));
    }

    let mut remaining = args.run_for_micros;
    loop {
        let slice = remaining.min(10_000.0);
        let outcome = board.run_microseconds(slice);
        remaining -= slice;
        match outcome {
            RunOutcome::Ok if remaining > 0.0 => continue,
            RunOutcome::Ok => {
                log::info!("run budget of {} us exhausted; board still running", args.run_for_micros);
                break;
            }
            RunOutcome::Halted(HaltReason::Done) => {
                log::info!("program terminated");
                break;
            }
            RunOutcome::Halted(HaltReason::Crashed) => {
                log::error!("board crashed");
                break;
            }
        }
    }

    write_luminance_pgm(&board, output_path(args))
}

fn output_path(args: &Args) -> PathBuf {
    args.output.clone().unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("boardsim_{}.pgm", timestamp))
    })
}

fn write_luminance_pgm(board: &Board, path: PathBuf) -> Result<(), String> {
    let width = boardsim_core::peripherals::lcd::LCD_WIDTH;
    let height = boardsim_core::peripherals::lcd::LCD_HEIGHT;
    let mut buf = vec![0u8; width * height];
    board.render_luminance(&mut buf);

    let mut file = fs::File::create(&path).map_err(|e| format!("creating {}: {}", path.display(), e))?;
    write!(file, "P5\n{} {}\n255\n", width, height).map_err(|e| e.to_string())?;
    file.write_all(&buf).map_err(|e| e.to_string())?;
    log::info!("wrote final framebuffer to {}", path.display());
    Ok(())
}
