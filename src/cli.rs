//! Command-line interface definitions.
//!
//! Every option can come from a flag or from the environment, so credentials
//! never have to appear on the command line.

use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::time::Duration;
use url::Url;

use crate::models::Credentials;
use crate::session::HttpSettings;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Credentials from the environment
/// MOODLE_LOGIN_URL=https://elearning.example.ac.id/login/index.php \
/// MOODLE_USERNAME=alice MOODLE_PASSWORD=... moodle_digest
///
/// # Portal with a self-signed certificate, JSON copy of the report
/// moodle_digest --accept-invalid-certs -j ./digests
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Login page URL of the portal
    #[arg(long, env = "MOODLE_LOGIN_URL")]
    pub login_url: Url,

    /// Portal username
    #[arg(long, env = "MOODLE_USERNAME", value_parser = NonEmptyStringValueParser::new())]
    pub username: String,

    /// Portal password
    #[arg(
        long,
        env = "MOODLE_PASSWORD",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub password: String,

    /// Skip TLS certificate validation (INSECURE; for portals with self-signed certificates)
    #[arg(long, env = "MOODLE_ACCEPT_INVALID_CERTS")]
    pub accept_invalid_certs: bool,

    /// Do not fetch assignment pages; the report omits the Deadline column
    #[arg(long)]
    pub no_deadlines: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "MOODLE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Also write the report as JSON into this directory
    #[arg(short, long, env = "MOODLE_JSON_OUTPUT_DIR")]
    pub json_output_dir: Option<String>,
}

/// Everything the run needs, resolved from the CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub http: HttpSettings,
    pub resolve_deadlines: bool,
    pub json_output_dir: Option<String>,
}

impl Cli {
    pub fn into_settings(self) -> Settings {
        Settings {
            credentials: Credentials {
                login_url: self.login_url,
                username: self.username,
                password: self.password,
            },
            http: HttpSettings {
                accept_invalid_certs: self.accept_invalid_certs,
                timeout: Duration::from_secs(self.timeout_secs),
            },
            resolve_deadlines: !self.no_deadlines,
            json_output_dir: self.json_output_dir,
        }
    }
}
