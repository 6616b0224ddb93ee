// Pigeon: peer-to-peer encrypted chat over UDP.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{bail, Context};
use pigeon_core::{Contact, Endpoint, SessionState};
use pigeon_node::{config, keys, Engine, StdinCommands};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut port = None;
    match args.next().as_deref() {
        Some("--version") | Some("-V") => {
            println!("pigeon {}", VERSION);
            return Ok(());
        }
        Some("keygen") => {
            let name = args.next().context("usage: pigeon keygen <name>")?;
            return keygen(&name);
        }
        Some(p) => port = Some(p.parse::<u16>().with_context(|| format!("invalid port {:?}", p))?),
        None => {}
    }
    if let Some(extra) = args.next() {
        bail!("unexpected argument {:?}", extra);
    }

    init_tracing();
    let mut cfg = config::load().context("loading configuration")?;
    if let Some(p) = port {
        cfg.port = p;
    }
    let (name, keypair) = keys::load_identity(&cfg.identity)
        .with_context(|| format!("loading identity {}", cfg.identity.display()))?;
    let directory = keys::load_directory(&cfg.directory)
        .with_context(|| format!("loading directory {}", cfg.directory.display()))?;
    let state = SessionState::new(name.as_str(), keypair, directory, cfg.security())
        .context("invalid identity name")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.port));
        let engine = Engine::bind(state, bind, cfg.transport())
            .await
            .with_context(|| format!("binding UDP port {}", cfg.port))?;
        info!(
            name = %name,
            local = %engine.local_endpoint(),
            sign = cfg.sign,
            encrypt = cfg.encrypt,
            "node up"
        );
        let mut commands = StdinCommands::spawn();
        tokio::select! {
            r = engine.run(&mut commands, |e| println!("{}", e)) => r?,
            r = shutdown_signal() => {
                r?;
                for e in engine.shutdown().await? {
                    println!("{}", e);
                }
            }
        }
        anyhow::Ok(())
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Write `<name>.toml` in the current directory and print the matching directory entry.
fn keygen(name: &str) -> anyhow::Result<()> {
    let (path, keypair) = keys::keygen(name, Path::new("."))?;
    let contact = Contact::new(
        name,
        *keypair.public_key(),
        Endpoint::new(Ipv4Addr::LOCALHOST.into(), config::Config::default().port),
    )?;
    eprintln!("identity written to {}", path.display());
    print!("{}", keys::render_directory_entry(&contact)?);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
