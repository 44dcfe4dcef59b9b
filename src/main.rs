use std::io::Write;

use anyhow::{Context, bail};
use sockwire::config::AdapterConfig;
use sockwire::http::request::{Method, RequestBuilder};
use sockwire::transport::{SocketAdapter, Target};
use url::Url;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(raw_url) = args.next() else {
        bail!("usage: sockwire <url> [METHOD]");
    };
    let method = match args.next() {
        Some(m) => Method::from_str(&m.to_uppercase())
            .with_context(|| format!("unknown method: {}", m))?,
        None => Method::GET,
    };

    let url = Url::parse(&raw_url).with_context(|| format!("invalid url: {}", raw_url))?;
    let target = Target::from_url(&url)?;
    let cfg = AdapterConfig::load()?;

    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        (None, _) => bail!("url has no host: {}", raw_url),
    };
    let path = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };

    let request = RequestBuilder::new(method)
        .target(path)
        .header("Host", host)
        .header("User-Agent", concat!("sockwire/", env!("CARGO_PKG_VERSION")))
        .header("Connection", "close")
        .build()?;

    let mut adapter = SocketAdapter::with_config(cfg);
    let response = adapter.send(&target, &request)?;

    tracing::info!(status = response.code(), bytes = response.body.len(), "response received");
    println!(
        "{} {} {}",
        response.status.version, response.status.code, response.status.reason
    );
    for header in &response.headers {
        println!("{}", header);
    }
    println!();

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(())
}
