mod cli;

use segpipe::{config, player};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use sp_av::ToolRegistry;
use sp_stream::SessionState;
use std::path::Path;

async fn play(manifest_path: &Path, item_dir: Option<&Path>, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let manifest = player::load_manifest(manifest_path)?;

    let plan = player::prepare(&config, manifest, item_dir).await?;
    let session = plan.session;

    let title = if session.title().is_empty() {
        manifest_path.display().to_string()
    } else {
        session.title().to_string()
    };
    println!(
        "Playing {} ({} segments from {})",
        title,
        session.segments().len(),
        plan.source
    );

    session.run()?;

    tokio::select! {
        _ = session.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("Interrupted, stopping playback");
                    session.stop();
                }
                Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
            }
            session.wait().await;
        }
    }

    match session.state() {
        SessionState::Completed => {
            println!("Playback complete");
            Ok(())
        }
        SessionState::Cancelled => {
            println!("Playback cancelled");
            Ok(())
        }
        SessionState::Failed(error) => anyhow::bail!("Playback failed: {}", error),
        other => anyhow::bail!("Playback ended in unexpected state {:?}", other),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "segpipe=trace,sp_stream=trace,sp_av=debug,sp_core=debug".to_string()
        } else {
            "segpipe=info,sp_stream=info,sp_av=info,sp_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Play { manifest, item_dir } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play(&manifest, item_dir.as_deref(), cli.config.as_deref()))
        }
        Commands::CheckTools { json } => check_tools(cli.config.as_deref(), json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("segpipe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("Checking external tools...\n");
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All decoders are available!");
    } else {
        println!("Some decoders are missing. Set decoder.program to one that is installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Decoder: {} {}", config.decoder.program.display(), config.decoder.args.join(" "));
    println!(
        "  Pipe: {} pages, {} queued chunks",
        config.pipe.buffer_pages, config.pipe.queue_chunks
    );
    println!(
        "  Source: {} page blocks, {}s stall timeout, {} headers",
        config.source.block_pages,
        config.source.stall_timeout_secs,
        config.source.headers.len()
    );
    println!("  Retries: {}", config.retry.max_retries);
    if let Some(dir) = &config.mirror.dir {
        println!("  Mirror: {}", dir.display());
    }
    if let Some(dir) = &config.store.dir {
        println!("  Store: {}", dir.display());
    }

    for warning in config.validate() {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}
