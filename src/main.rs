// src/main.rs
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use reconsrc::config::Config;
use reconsrc::context::Collaborators;
use reconsrc::core::collab::CredentialStore;
use reconsrc::core::model::{AddrRequest, AsnRequest, DnsRequest, Request, SourceEvent, WhoisRequest};
use reconsrc::core::MemoryCache;
use reconsrc::scope_filter::{ScopeCache, ScopeFilter};
use reconsrc::service::SourceRegistry;
use reconsrc::sources;
use reconsrc::utils::HttpClient;

#[derive(Parser)]
#[command(name = "reconsrc")]
#[command(about = "Query third-party recon data sources for names, AS facts and WHOIS pivots")]
struct Args {
    #[command(subcommand)]
    command: Cli,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true, help = "Only use this data source")]
    source: Option<String>,
}

#[derive(Subcommand)]
enum Cli {
    /// Resolve AS facts for an address or AS number
    Asn {
        #[arg(long, help = "IP address to look up")]
        addr: Option<IpAddr>,

        #[arg(long, help = "AS number to look up")]
        asn: Option<u32>,
    },

    /// Find domains that share WHOIS contacts or networks with a domain
    Whois {
        #[arg(help = "In-scope domain")]
        domain: String,
    },

    /// Discover names under a domain
    Names {
        #[arg(help = "Target domain")]
        domain: String,

        #[arg(long, help = "Also ask for names pointing at these addresses")]
        addr: Vec<IpAddr>,
    },

    /// List data sources and their configuration state
    Sources,

    /// Initialize config
    Init {
        #[arg(short, long, help = "Force overwrite existing configuration")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Cli::Init { force } => {
            let config_path = Config::init(force)?;
            println!("Configuration initialized at {}", config_path.display());
            Ok(())
        }
        Cli::Sources => {
            let config = Config::load(args.config.as_deref())?;
            for name in sources::AVAILABLE {
                let state = if !config.is_source_enabled(name) {
                    "disabled"
                } else if config.credentials(name).is_some() {
                    "api key configured"
                } else {
                    "no api key"
                };
                println!("{:<12} {}", name, state);
            }
            Ok(())
        }
        Cli::Asn { addr, asn } => {
            if addr.is_none() && asn.is_none() {
                bail!("asn needs --addr or --asn");
            }
            let request = Request::Asn(AsnRequest {
                address: addr,
                asn: asn.filter(|asn| *asn != 0),
                known: None,
            });
            run(args.config, args.source, None, vec![request]).await
        }
        Cli::Whois { domain } => {
            let request = Request::Whois(WhoisRequest { domain: domain.clone() });
            run(args.config, args.source, Some(domain), vec![request]).await
        }
        Cli::Names { domain, addr } => {
            let mut requests = vec![Request::Dns(DnsRequest { domain: domain.clone() })];
            requests.extend(addr.into_iter().map(|address| {
                Request::Addr(AddrRequest { address, domain: Some(domain.clone()) })
            }));
            run(args.config, args.source, Some(domain), requests).await
        }
    }
}

/// Start the configured sources, feed them `requests` and print what they produce
async fn run(
    config_path: Option<PathBuf>,
    only: Option<String>,
    target: Option<String>,
    requests: Vec<Request>,
) -> Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(domain) = target {
        config.scope.include_domains.push(domain);
    }

    let scope = ScopeFilter::new(&config.scope).context("Invalid scope configuration")?;
    let transport = HttpClient::new(Some(config.global.user_agent.clone()), Some(config.global.timeout_secs))?;
    let cache = Arc::new(MemoryCache::new());
    let collaborators = Collaborators {
        credentials: Arc::new(config.clone()),
        scope: Arc::new(ScopeCache::new(scope)),
        cache: cache.clone(),
        transport: Arc::new(transport),
    };

    let mut registry = SourceRegistry::new(collaborators, config.global.mailbox_size, config.global.event_buffer);
    for source in sources::from_config(&config) {
        if only.as_deref().map_or(true, |name| name.eq_ignore_ascii_case(source.name())) {
            registry.register_source(source);
        }
    }
    if registry.start_all().await == 0 {
        bail!("No data source could be started");
    }

    let mut events = registry.take_events().context("Event stream already taken")?;
    let collector = tokio::spawn(async move {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        collected
    });

    for request in requests {
        registry.broadcast(request).await;
    }

    tokio::select! {
        _ = registry.finish() => {},
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping data sources"),
    }

    let events: Vec<SourceEvent> = collector.await.context("Event collector failed")?;
    info!("{} events, {} AS facts", events.len(), cache.len());

    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    if !cache.is_empty() {
        println!("{}", serde_json::to_string_pretty(&cache.facts())?);
    }

    Ok(())
}
