//! Terminal front end
//!
//! Runs one program through the same host/worker bridge the browser
//! uses. Lines typed on stdin become pending input; output is printed as
//! the console receives it.

use clap::Parser;
use playbridge::bridge::{channel, TryRecvError};
use playbridge::host::ConsoleEntryKind;
use playbridge::{MiniPython, PlaygroundConfig, RunOutcome, Session};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const PUMP_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Parser)]
#[command(name = "playground", about = "Run a program with interactive stdin")]
struct Args {
    /// Source file; runs the sample program when omitted
    source: Option<PathBuf>,

    /// Stdin bus capacity in bytes
    #[arg(long)]
    stdin_capacity: Option<usize>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    playbridge::logging::init();
    let args = Args::parse();

    match run(args) {
        Ok(RunOutcome::Succeeded) | Ok(RunOutcome::Interrupted) => ExitCode::SUCCESS,
        Ok(RunOutcome::Failed(_)) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);
            eprintln!("playground: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PlaygroundConfig::load(path)?,
        None => PlaygroundConfig::default(),
    };
    if let Some(capacity) = args.stdin_capacity {
        config.stdin_capacity = capacity;
    }
    config.validate()?;

    let source = match &args.source {
        Some(path) => std::fs::read_to_string(path)?,
        None => config.default_source.clone(),
    };

    let mut session = Session::spawn(config, || Box::new(MiniPython::new()))?;
    session.host_mut().console_mut().add_listener(|entry| match entry.kind {
        ConsoleEntryKind::Output => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(entry.value.as_bytes());
            let _ = out.flush();
        }
        ConsoleEntryKind::Error => {
            let _ = std::io::stderr().write_all(entry.value.as_bytes());
        }
        // The terminal already echoed it
        ConsoleEntryKind::Input => {}
    });

    if !session.wait_ready(READY_TIMEOUT)? {
        return Err("worker did not become ready".into());
    }

    let (keys_tx, keys) = channel::<String>();
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(mut line) = line else { break };
                line.push('\n');
                if keys_tx.send(line).is_err() {
                    break;
                }
            }
            keys_tx.close();
        })?;

    session.host_mut().start_run(&source)?;
    info!("run started");

    let mut stdin_open = true;
    while session.host().is_running() {
        session.host_mut().pump()?;

        while stdin_open {
            match keys.try_recv() {
                Ok(line) => {
                    if let Err(err) = session.host_mut().push_keys(&line) {
                        error!(error = %err, "input rejected");
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => stdin_open = false,
            }
        }

        let host = session.host();
        if !stdin_open && host.is_running() && host.is_awaiting_input() {
            eprintln!("EOFError: EOF when reading a line");
            session.host_mut().request_stop()?;
            session.terminate()?;
            return Ok(RunOutcome::Failed("EOFError".into()));
        }
        thread::sleep(PUMP_INTERVAL);
    }

    let outcome = session
        .host()
        .last_outcome()
        .cloned()
        .unwrap_or(RunOutcome::Interrupted);
    session.terminate()?;
    Ok(outcome)
}
