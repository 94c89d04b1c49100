use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use xrobot::config::{DebuggerConfig, EngineFailurePolicy};
use xrobot::dap::protocol::DapEvent;
use xrobot::dap::{ClientOptions, TransportClient};
use xrobot::debugger::bootstrap::SessionPaths;
use xrobot::{xr_info, xr_warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Debugger configuration (TOML), defaults are used for missing keys
    #[clap(long, env = "XROBOT_DEBUGGER_CONFIG")]
    config: Option<PathBuf>,

    /// What to do when the engine fails to set up the debug target: degrade | fail_fast
    #[clap(long)]
    engine_failure: Option<EngineFailurePolicy>,

    /// Connect to a running debug adapter and print its events
    #[clap(long)]
    attach: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    xrobot::log::silence_under_jupyter();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DebuggerConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => DebuggerConfig::default(),
    };
    if let Some(policy) = args.engine_failure {
        config.engine_failure = policy;
    }

    match &args.attach {
        Some(endpoint) => attach(endpoint, &config),
        None => {
            print_settings(&config);
            Ok(())
        }
    }
}

fn print_settings(config: &DebuggerConfig) {
    let paths = SessionPaths::for_current_process(&config.temp_root());
    println!("{config:#?}");
    println!("session logs: {}", paths.log_dir.display());
    println!("cell files: {}", paths.tmp_file_prefix());
}

/// Print every event of the adapter at `endpoint` as a JSON line,
/// with the stack of each stopped thread, until Ctrl-C.
fn attach(endpoint: &str, config: &DebuggerConfig) -> anyhow::Result<()> {
    let (events_tx, events) = mpsc::channel::<Value>();
    let mut client = TransportClient::connect(endpoint, ClientOptions::from_config(config), events_tx)
        .with_context(|| format!("attach to {endpoint}"))?;
    xr_info!(target: "dap", "attached to {}", client.peer_addr());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let mut seq = 0;
    while !interrupted.load(Ordering::SeqCst) && client.is_connected() {
        let event = match events.recv_timeout(config.poll_interval()) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        println!("{event}");

        let Ok(event) = serde_json::from_value::<DapEvent>(event) else {
            continue;
        };
        if let Some(thread_id) = event.stopped_thread() {
            seq += 1;
            match client.get_stack_frames(thread_id, seq) {
                Ok(frames) => {
                    for frame in frames {
                        println!("  {frame}");
                    }
                }
                Err(err) => xr_warn!(target: "dap", "stack of thread {thread_id}: {err:#}"),
            }
        }
    }

    client.shutdown();
    Ok(())
}
