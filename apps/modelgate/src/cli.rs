use clap::Parser;

use modelgate_common::GlobalConfigPatch;

#[derive(Parser)]
#[command(name = "modelgate")]
pub(crate) struct Cli {
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[arg(long)]
    pub(crate) dsn: Option<String>,
    #[arg(long)]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host,
            port: self.port,
            dsn: self.dsn,
            proxy: self.proxy,
            relay: None,
        }
    }
}

/// ENV layer: MODELGATE_HOST, MODELGATE_PORT, MODELGATE_DSN, MODELGATE_PROXY.
pub(crate) fn env_patch() -> GlobalConfigPatch {
    GlobalConfigPatch {
        host: std::env::var("MODELGATE_HOST").ok(),
        port: std::env::var("MODELGATE_PORT")
            .ok()
            .and_then(|v| v.parse().ok()),
        dsn: std::env::var("MODELGATE_DSN").ok(),
        proxy: std::env::var("MODELGATE_PROXY").ok(),
        relay: None,
    }
}
