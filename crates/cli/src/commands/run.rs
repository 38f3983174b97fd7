//! `taskloop run`: carry out a single instruction.

use std::path::PathBuf;
use taskloop_core::agent::TaskRequest;

use super::{Runtime, load_config, print_result};

pub async fn run(
    message: String,
    files: Vec<PathBuf>,
    max_turns: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(max_turns)?;
    // A single instruction ends with a final answer, not a hand-back.
    config.agent.interactive_mode = false;

    let mut runtime = Runtime::start(&config)?;
    let request = TaskRequest::new(message).with_attachments(files);
    let outcome = runtime.run_task(request).await;
    runtime.shutdown().await;

    let result = outcome?;
    print_result(&result, "");
    Ok(())
}
