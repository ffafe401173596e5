//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lazyfetch_core::config::{DEFAULT_MAX_REDIRECTS, MAX_REDIRECTS_LIMIT};

/// Redirect-aware HTTP requests with cookie capture and nested uploads.
///
/// Every response header of a redirect chain is captured hop by hop, cookies
/// are mirrored into an attribute-aware store, and nested form data is
/// flattened into bracketed field names.
#[derive(Parser, Debug)]
#[command(name = "lazyfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Let the engine replay cookies within this run
    #[arg(long)]
    pub send_cookies: bool,

    /// Netscape cookie file to read cookies from
    #[arg(long, value_name = "PATH")]
    pub cookie_file: Option<PathBuf>,

    /// Netscape cookie file written when the run ends
    #[arg(long, value_name = "PATH")]
    pub cookie_jar: Option<PathBuf>,

    /// Connection timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Whole-request timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Maximum redirects followed per request (0-50)
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_REDIRECTS_LIMIT)))]
    pub max_redirects: u32,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// User-Agent header sent with requests
    #[arg(short = 'A', long, value_name = "UA")]
    pub user_agent: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a URL and print its body
    Get {
        /// URL to fetch
        url: String,

        /// Send HEAD and print the captured headers instead of the body
        #[arg(long)]
        head: bool,

        /// Print the call log as JSON after the body
        #[arg(long)]
        show_log: bool,
    },

    /// Send form fields and print the response body
    Post {
        /// URL to send to
        url: String,

        /// Nested field data as a JSON object
        #[arg(long, value_name = "DATA", conflicts_with = "field")]
        json: Option<String>,

        /// Form field as name=value; name=@path attaches a file
        #[arg(short = 'F', long = "field", value_name = "NAME=VALUE")]
        field: Vec<String>,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "POST")]
        method: String,

        /// Print the call log as JSON after the body
        #[arg(long)]
        show_log: bool,
    },

    /// Download a URL into a local directory
    Download {
        /// URL to download
        url: String,

        /// Target directory (default ./temp)
        #[arg(short = 'o', long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Local file name
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing file instead of renaming
        #[arg(long)]
        overwrite: bool,
    },

    /// Upload a local file with PUT
    Upload {
        /// Local file
        file: PathBuf,

        /// Remote directory URL
        remote: String,

        /// Remote file name
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing remote file instead of renaming
        #[arg(long)]
        overwrite: bool,
    },

    /// Fetch URLs in turn and print the collected cookies as JSON
    Cookies {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Report version and working directory readiness
    Env,
}
