//! `taskloop chat`: interactive session.
//!
//! Each line is a new instruction that resumes the same history.
//! `/clear` starts over, `/attach <path>` queues a file for the next
//! instruction, and `exit` quits.

use std::io::Write;
use std::path::PathBuf;
use taskloop_config::AppConfig;
use taskloop_core::agent::TaskRequest;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{Runtime, load_config, print_result};

/// What a line of input asks for.
#[derive(Debug, PartialEq)]
enum Input {
    Empty,
    Exit,
    Clear,
    Attach(PathBuf),
    Instruction(String),
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "exit" | "quit" | "/exit" | "/quit" => Input::Exit,
        "/clear" => Input::Clear,
        _ => match line.strip_prefix("/attach ") {
            Some(path) if !path.trim().is_empty() => Input::Attach(PathBuf::from(path.trim())),
            _ => Input::Instruction(line.to_string()),
        },
    }
}

fn print_banner(config: &AppConfig, runtime: &Runtime) {
    println!();
    println!("  taskloop: interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Tools:     {}", runtime.agent.tools().names().join(", "));
    println!("  Session:   {}", runtime.session_id);
    println!("  Budget:    {} tokens", config.context.token_budget);
    println!();
    println!("  Type an instruction and press Enter.");
    println!("  /attach <path> queues a file, /clear resets the conversation.");
    println!("  Ctrl+C cancels a running task; 'exit' quits.");
    println!();
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

pub async fn run(max_turns: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(max_turns)?;
    let mut runtime = Runtime::start(&config)?;
    print_banner(&config, &runtime);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attachments: Vec<PathBuf> = Vec::new();

    prompt()?;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_line(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Clear => {
                runtime.agent.clear();
                attachments.clear();
                println!("  [History cleared]");
            }
            Input::Attach(path) => {
                println!("  [Attached {}]", path.display());
                attachments.push(path);
            }
            Input::Instruction(instruction) => {
                let request = TaskRequest::new(instruction)
                    .with_attachments(std::mem::take(&mut attachments))
                    .resume(true);
                match runtime.run_task(request).await {
                    Ok(result) => {
                        println!();
                        print_result(&result, "  Assistant > ");
                        println!();
                    }
                    Err(e) => {
                        eprintln!("  [Error] {e}");
                        println!();
                    }
                }
            }
        }
        prompt()?;
    }

    runtime.shutdown().await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}
