//! `taskloop config`: configuration management commands.

use taskloop_config::AppConfig;

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// The configuration as TOML with the API key masked.
fn redacted_toml(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&shown)
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

pub fn path() {
    println!("{}", config_path().display());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    if config.has_api_key() {
        println!("   API key configured");
    } else {
        println!("   Warning: no API key (set TASKLOOP_API_KEY or ANTHROPIC_API_KEY)");
    }

    println!();
    println!("   Model:       {}", config.model);
    println!("   Max turns:   {}", config.agent.max_turns);
    println!(
        "   Mode:        {}",
        if config.agent.interactive_mode {
            "interactive"
        } else {
            "batch"
        }
    );
    println!("   Budget:      {} tokens", config.context.token_budget);
    println!("   Retries:     {}", config.retry.max_retries);
    match &config.session.dir {
        Some(dir) => println!("   Sessions:    {}", dir.display()),
        None => println!("   Sessions:    not persisted"),
    }
    Ok(())
}

/// Write the default configuration unless a file already exists.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
