use clap::Parser;

/// CLI arguments for the relay server.
#[derive(Parser, Debug)]
#[clap(name = "collab-notes")]
#[clap(about = "Broadcast relay for the collaborative note editor", long_about = None)]
pub struct Args {
    /// Port to listen on
    #[clap(short, long, default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Allowed cross-origin source (repeatable). Any origin when omitted.
    #[clap(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,
}
