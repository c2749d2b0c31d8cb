//! Startup parameters.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "relaychat-server", about = "Federated line-protocol chat server")]
pub struct ServerConfig {
    /// Address both listeners bind to.
    #[arg(long, env = "RELAYCHAT_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for client connections (0 picks a free port).
    #[arg(long, env = "RELAYCHAT_CLIENT_PORT", default_value_t = 13337)]
    pub client_port: u16,

    /// Port for server-to-server links (0 picks a free port).
    #[arg(long, env = "RELAYCHAT_PEER_PORT", default_value_t = 13338)]
    pub peer_port: u16,

    /// Peer server to keep a link to, as host:port.
    #[arg(long, env = "RELAYCHAT_PEER")]
    pub peer: Option<String>,

    /// Message of the day, sent to every client once registered.
    #[arg(long, env = "RELAYCHAT_MOTD", default_value = "Welcome to relaychat")]
    pub motd: String,

    /// Upper bound on the reconnect backoff for --peer, in seconds.
    #[arg(long, env = "RELAYCHAT_PEER_RETRY_MAX_SECS", default_value_t = 60)]
    pub peer_retry_max_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            client_port: 13337,
            peer_port: 13338,
            peer: None,
            motd: "Welcome to relaychat".to_string(),
            peer_retry_max_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.bind, self.client_port)
    }

    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.bind, self.peer_port)
    }

    pub fn peer_retry_max(&self) -> Duration {
        Duration::from_secs(self.peer_retry_max_secs)
    }
}
