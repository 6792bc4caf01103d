use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use stars_link::api::PlaceKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stars",
    about = "Command line client for the stars tourism service",
    long_about = "Watch live congestion, weather, traffic and parking feeds, browse and search places, \
                  and send authorized API requests with automatic access token renewal.",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// API server base URL, overrides the configuration file
    #[arg(long, env = "STARS_HOST", global = true)]
    pub host: Option<String>,

    /// Output format, overrides the configuration file
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a live topic and print its events until interrupted
    #[command(alias = "w")]
    Watch {
        /// Topic name (congestion, external) or a custom push path starting with '/'
        topic: String,

        /// Event kind to follow; repeat for several. Defaults to every known kind of the topic
        #[arg(short, long = "event", value_name = "KIND")]
        events: Vec<String>,
    },

    /// Send an authorized request to the API server
    #[command(alias = "req")]
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the server, e.g. /user/info
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// List areas, places of one kind, or events
    Places {
        #[arg(value_enum)]
        target: PlaceListing,
    },

    /// Show details of one place
    Place {
        /// attraction, restaurant, cafe or accommodation
        #[arg(value_parser = parse_place_kind)]
        kind: PlaceKind,

        /// Place identifier
        id: String,
    },

    /// List places in an area
    AreaPlaces {
        /// Area identifier
        area_id: String,
    },

    /// Search places by name or by address
    #[command(alias = "s")]
    Search {
        /// Search text
        query: String,

        /// Match against addresses instead of names
        #[arg(short, long)]
        address: bool,
    },

    /// Store an access/refresh token pair
    Login {
        #[arg(long, env = "STARS_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "STARS_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
    },

    /// Forget the stored credential
    Logout,

    /// Show whether a credential is stored
    Whoami,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset to defaults
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlaceListing {
    Area,
    Attraction,
    Restaurant,
    Cafe,
    Accommodation,
    Events,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON document per line
    Json,
}

fn parse_place_kind(s: &str) -> Result<PlaceKind, String> {
    s.parse().map_err(|e: stars_link::LinkError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_watch_events() {
        let args = Args::try_parse_from([
            "stars",
            "watch",
            "congestion",
            "--event",
            "congestion-alert",
            "-e",
            "congestion-update",
        ])
        .unwrap();
        match args.command {
            Commands::Watch { topic, events } => {
                assert_eq!(topic, "congestion");
                assert_eq!(events, vec!["congestion-alert", "congestion-update"]);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_place_kind_argument() {
        let args = Args::try_parse_from(["stars", "place", "cafe", "17"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Place {
                kind: PlaceKind::Cafe,
                ..
            }
        ));
        assert!(Args::try_parse_from(["stars", "place", "museum", "17"]).is_err());
    }
}
