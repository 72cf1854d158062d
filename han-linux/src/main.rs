// HAN coordinator for Linux: device link, single feed loop, REST front end.

mod config;
mod http;
mod link;

use std::net::TcpListener;
use std::time::Duration;

use anyhow::Context as _;
use han_core::{Context, IoStream, Messenger, Reserved, Stream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sleep between loop turns when neither the link nor the listener had work.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("han-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    cfg.messenger.validate().context("invalid [messenger] settings")?;

    let addr = link::LinkAddr::parse(&cfg.link);
    let link = link::open(&addr).with_context(|| format!("cannot open link {}", cfg.link))?;
    let mut messenger = Messenger::with_config(IoStream::new(link), &cfg.messenger)?;
    register_handlers(&mut messenger)?;
    info!(link = %cfg.link, "device link open");

    let listener = TcpListener::bind(("0.0.0.0", cfg.http_port))
        .with_context(|| format!("cannot listen on port {}", cfg.http_port))?;
    listener.set_nonblocking(true)?;
    info!(port = cfg.http_port, require_ack = cfg.require_ack, "REST front end listening");

    loop {
        let fed = messenger.feed_available().context("device link failed")?;
        let served = http::poll(&listener, &mut messenger, cfg.require_ack)?;
        if fed == 0 && !served {
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

/// Handlers for what the device sends back on its own.
fn register_handlers<S: Stream>(messenger: &mut Messenger<S>) -> anyhow::Result<()> {
    messenger.register(Reserved::Ack.id(), |ctx: &mut Context<'_>| {
        let detail = ctx.args().read_str().unwrap_or_default().to_string();
        info!(%detail, "device acknowledged");
    })?;
    messenger.register(Reserved::Ready.id(), |_: &mut Context<'_>| {
        info!("device ready");
    })?;
    messenger.register(Reserved::Error.id(), |ctx: &mut Context<'_>| {
        let detail = ctx.args().read_str().unwrap_or_default().to_string();
        warn!(%detail, "device rejected a command");
    })?;
    messenger.register_name("valve_state", |ctx: &mut Context<'_>| {
        let args = ctx.args();
        let valve = args.read_int();
        let open = args.read_int() != 0;
        info!(valve, open, "valve state");
    })?;
    messenger.register_default(|ctx: &mut Context<'_>| {
        let id = ctx.id();
        warn!(id, "unknown command from device");
        if let Err(e) = ctx.reply(Reserved::Error.id(), &id.to_string()) {
            warn!(error = %e, "cannot report unknown command");
        }
    });
    Ok(())
}
