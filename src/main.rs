mod cli;

use packsound::{config, server};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting packsound server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!(
        "Cache directory {:?}, format {}",
        config.cache.dir,
        config.transcode.format.extension()
    );

    let ctx = server::AppContext::with_tools(config)?;
    tracing::info!("Recovered {} cache entries", ctx.store.len());

    let result = server::start_server(ctx).await;
    tracing::info!("Shutting down...");
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "packsound=trace,packsound_av=trace,packsound_common=debug,tower_http=debug".to_string()
        } else {
            "packsound=debug,packsound_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Resolve { reference } => resolve(&reference),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("packsound {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn resolve(reference: &str) -> Result<()> {
    let source = packsound_common::resolve_reference(reference)?;
    println!("Id: {}", source.id);
    match source.locator {
        Some(locator) => println!("Locator: {}", locator),
        None => println!("Locator: none (served from cache only)"),
    }
    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let ytdlp = config
        .tools
        .ytdlp_path
        .as_ref()
        .map_or("yt-dlp".to_string(), |p| p.to_string_lossy().into_owned());
    let ffmpeg = config
        .tools
        .ffmpeg_path
        .as_ref()
        .map_or("ffmpeg".to_string(), |p| p.to_string_lossy().into_owned());

    let tools = packsound_av::check_tools(&ytdlp, &ffmpeg);
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
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("Some tools are missing; install yt-dlp and ffmpeg or set their paths")
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Cache dir: {:?}", config.cache.dir);
    println!(
        "  Cache bounds: {} bytes, {}s idle",
        config.cache.max_total_bytes, config.cache.max_idle_secs
    );
    println!(
        "  Transcode: {} {} Hz {}ch",
        config.transcode.format.extension(),
        config.transcode.sample_rate,
        config.transcode.channels
    );
    println!("  Extract format: {}", config.extract.format);

    Ok(())
}
