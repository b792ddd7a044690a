use clap::{Parser, Subcommand};
use cozy_realtime_client::{EntityRef, EventName, RealtimeConfig};

/// Follow the realtime feed of a cozy instance from the terminal
#[derive(Parser, Debug)]
#[command(name = "cozy-realtime", version)]
#[command(about = "Print realtime changes of a cozy instance as JSON lines", long_about = None)]
pub struct Cli {
    /// Cozy domain (e.g., alice.mycozy.cloud)
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// Cozy URL (alternative to --domain)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Application token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Connect with ws:// instead of wss:// (ignored with --url)
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch doctypes or single documents
    Watch {
        /// Targets, as `doctype` or `doctype/id`
        #[arg(required = true, value_name = "DOCTYPE[/ID]")]
        targets: Vec<EntityRef>,

        /// Events to watch, comma separated (default: all)
        #[arg(short, long = "event", value_delimiter = ',')]
        events: Vec<EventName>,
    },
}

impl Cli {
    /// Flags first, then `COZY_REALTIME_*` environment variables.
    pub fn config(&self) -> RealtimeConfig {
        RealtimeConfig {
            domain: self.domain.clone(),
            secure: self.insecure.then_some(false),
            token: self.token.clone(),
            url: self.url.clone(),
        }
        .or(RealtimeConfig::from_env())
    }
}
