use crate::configuration::Configuration;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Appointment availability and booking client")]
pub struct ConfigurationHandler {
    /// Port of the local HTTP interface
    #[arg(long, env = "PORT", default_value = "3000")]
    port: String,

    /// Appointment service, e.g. http://localhost:8080
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// Days of example slots for the in-process schedule
    #[arg(long, env = "EXAMPLE_DAYS", default_value_t = 5)]
    example_days: i64,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> String {
        self.port.clone()
    }

    fn backend_url(&self) -> Option<String> {
        self.backend_url.clone().filter(|url| !url.trim().is_empty())
    }

    fn example_days(&self) -> i64 {
        self.example_days
    }
}
