//! Subcommand implementations and the session wiring they share.

pub mod chat;
pub mod config_cmd;
pub mod run;

use std::sync::Arc;
use taskloop_agent::{AgentLoop, EventPump, PumpStats};
use taskloop_config::AppConfig;
use taskloop_core::agent::{TaskRequest, TaskResult, TerminalState};
use taskloop_core::event::EventBus;
use taskloop_core::session::{FileSessionStore, SessionId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::console::ConsoleObserver;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load the configuration and make sure a provider can be built from it.
pub fn load_config(max_turns: Option<u32>) -> CliResult<AppConfig> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    TASKLOOP_API_KEY=sk-ant-...    (highest priority)");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    if let Some(max_turns) = max_turns {
        if max_turns == 0 {
            return Err("--max-turns must be at least 1".into());
        }
        config.agent.max_turns = max_turns;
    }
    Ok(config)
}

/// One agent session: the loop plus the event pump draining its bus.
pub struct Runtime {
    pub agent: AgentLoop,
    pub session_id: SessionId,
    bus: Arc<EventBus>,
    pump: JoinHandle<PumpStats>,
}

impl Runtime {
    pub fn start(config: &AppConfig) -> CliResult<Self> {
        let provider = taskloop_providers::build_provider(config)?;
        let bus = Arc::new(EventBus::new(config.session.event_buffer));
        let session_id = SessionId::new();

        let mut pump = EventPump::new().with_observer(Arc::new(ConsoleObserver::default()));
        if let Some(dir) = &config.session.dir {
            pump = pump.with_persistence(session_id.clone(), Arc::new(FileSessionStore::new(dir)));
        }
        let pump = pump.spawn(bus.subscribe());

        let agent = AgentLoop::from_config(config, provider, Vec::new(), bus.clone())?;
        info!(
            session_id = %session_id,
            model = %config.model,
            interactive = config.agent.interactive_mode,
            "Session started"
        );

        Ok(Self {
            agent,
            session_id,
            bus,
            pump,
        })
    }

    /// Run one instruction. Ctrl-C while it runs requests cancellation;
    /// the loop stops at its next check.
    pub async fn run_task(&mut self, request: TaskRequest) -> taskloop_core::Result<TaskResult> {
        let interrupt = self.agent.interrupt_handle();
        let run = self.agent.run(request);
        tokio::pin!(run);

        loop {
            tokio::select! {
                outcome = &mut run => return outcome,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "Cannot listen for Ctrl-C");
                        return run.await;
                    }
                    eprintln!("\n  Cancelling after the current step...");
                    interrupt.cancel();
                }
            }
        }
    }

    /// Drop the loop and wait for the pump to drain the remaining events.
    pub async fn shutdown(self) -> PumpStats {
        let Self {
            agent,
            session_id,
            bus,
            pump,
        } = self;
        drop(agent);
        drop(bus);

        match pump.await {
            Ok(stats) => {
                debug!(session_id = %session_id, ?stats, "Event pump drained");
                stats
            }
            Err(e) => {
                warn!(error = %e, "Event pump task failed");
                PumpStats::default()
            }
        }
    }
}

/// Print a task outcome. Answers go to stdout, status lines to stderr.
pub fn print_result(result: &TaskResult, prefix: &str) {
    match result.state {
        TerminalState::Completed => {
            if result.output.is_empty() {
                eprintln!("  [{}]", result.message);
            }
            for line in result.output.lines() {
                println!("{prefix}{line}");
            }
        }
        TerminalState::Interrupted(_) | TerminalState::MaxTurnsExceeded => {
            eprintln!("  [{}]", result.message);
        }
    }
    debug!(
        iterations = result.iterations,
        input_tokens = result.usage.input_tokens,
        output_tokens = result.usage.output_tokens,
        "Task usage"
    );
}
