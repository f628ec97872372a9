use crate::{cache, geocode, pipeline::Paths};
use anyhow::{Error, Result, anyhow};
use chrono::{NaiveTime, Weekday};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use std::{io, path::PathBuf, time::Duration};
use tracing_subscriber::filter::LevelFilter as TFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum LogFormat {
    Normal,
    Compact,
    Pretty,
    #[default]
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Log level verbosity
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Which log formatter to use
    // env will pick up the value if the field name is given as the key in uppercase
    #[arg(short = 'f', long, env, default_value_t, value_enum, global = true)]
    pub log_format: LogFormat,

    /// Directory holding burgers.json and summary.json
    #[arg(long, env, default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Directory to store downloaded images in
    #[arg(long, env, default_value = "images", global = true)]
    pub images_dir: PathBuf,

    /// How long to keep fetched pages in the HTTP cache, 0 to disable
    #[arg(long, env, default_value = "1h", value_parser = humantime::parse_duration, global = true)]
    pub cache_ttl: Duration,

    /// Timeout for requests to the event site
    #[arg(long, env, default_value = "30s", value_parser = humantime::parse_duration, global = true)]
    pub request_timeout: Duration,

    /// Persist the HTTP cache to this file between runs
    #[arg(long, env, global = true)]
    pub cache_path: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct GeocodeArgs {
    /// Geocoding service to use
    #[arg(long, env = "GEOCODE_PROVIDER", default_value_t, value_enum)]
    pub provider: geocode::ProviderKind,

    /// Override the provider API URL
    #[arg(long, env = "GEOCODE_ENDPOINT")]
    pub geocode_endpoint: Option<String>,

    /// API key, required by Google
    #[arg(long, env = "GOOGLE_GEOCODING_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Appended to every address lookup
    #[arg(long, default_value = "Portland, OR")]
    pub locality: String,

    /// Pause before every geocoding request
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub min_interval: Duration,

    /// Save progress after this many records
    #[arg(long, default_value_t = 10)]
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Scrape listings and details
    Scrape,
    /// Look up coordinates for records lacking them
    Geocode(GeocodeArgs),
    /// Download images for records lacking them
    Images,
    /// Scrape, geocode and download images
    Run {
        /// Cron spec (with seconds) for running repeatedly, instead of once
        #[arg(short, long)]
        cron: Option<String>,

        #[command(flatten)]
        geocode: GeocodeArgs,
    },
    /// List restaurants open at the given time, or now
    Open {
        /// Day and time, e.g. "Fri 13:00"
        #[arg(long, value_parser = parse_day_time)]
        at: Option<(Weekday, NaiveTime)>,
    },
    /// Normalize stored addresses
    CleanAddresses,
    /// Re-read neighborhoods from the listings page
    RefreshNeighborhoods,
}

/// Parse a weekday and a 24h time, like "Fri 13:00"
pub fn parse_day_time(s: &str) -> Result<(Weekday, NaiveTime)> {
    let (day, time) = s
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("expected day and time, like \"Fri 13:00\""))?;
    let day = day
        .parse::<Weekday>()
        .map_err(|_| anyhow!("invalid day: {day}"))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")?;
    Ok((day, time))
}

impl GeocodeArgs {
    pub fn opts(&self) -> geocode::Opts {
        geocode::Opts {
            provider: self.provider,
            endpoint: self.geocode_endpoint.clone(),
            api_key: self.api_key.clone(),
            locality: self.locality.clone(),
            min_interval: self.min_interval,
            checkpoint_every: self.checkpoint_every,
            ..Default::default()
        }
    }
}

impl Cli {
    /// Wrapper for clap::Parser::try_parse_from
    pub fn try_parse_opts<I, T>(itr: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(itr).map_err(Error::from)
    }

    // this thin wrapper makes it possible to do the parsing without importing clap::Parser at the
    // call site
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn cache_opts(&self) -> cache::Opts {
        cache::Opts {
            request_timeout: self.request_timeout,
            cache_ttl: self.cache_ttl,
            cache_capacity: CACHE_CAPACITY,
            cache_path: self.cache_path.clone(),
        }
    }

    pub fn paths(&self) -> Paths {
        Paths {
            data_dir: self.data_dir.clone(),
            images_dir: self.images_dir.clone(),
        }
    }

    /// Geocoding settings of the command, or the defaults for commands without any
    pub fn geocode_opts(&self) -> geocode::Opts {
        match &self.command {
            Commands::Geocode(args) | Commands::Run { geocode: args, .. } => args.opts(),
            _ => geocode::Opts::default(),
        }
    }

    /// Maps clap_verbosity_flag::LevelFilter values to tracing_subscriber::filter::LevelFilter
    /// values
    fn tracing_level_filter(&self) -> TFilter {
        match self.verbosity.log_level_filter() {
            LevelFilter::Off => TFilter::OFF,
            LevelFilter::Error => TFilter::ERROR,
            LevelFilter::Warn => TFilter::WARN,
            LevelFilter::Info => TFilter::INFO,
            LevelFilter::Debug => TFilter::DEBUG,
            LevelFilter::Trace => TFilter::TRACE,
        }
    }

    pub fn init_logger(&self) -> Result<()> {
        let layer = match self.log_format {
            LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
            LogFormat::Pretty => fmt::layer().pretty().with_writer(io::stderr).boxed(),
            LogFormat::Compact => fmt::layer()
                .without_time()
                .compact()
                .with_writer(io::stderr)
                .boxed(),
            LogFormat::Normal => fmt::layer().with_writer(io::stderr).boxed(),
        };
        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.tracing_level_filter().into())
                    .from_env()?,
            )
            .with(layer)
            .init();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_opts(["burgerweek", "scrape"]).unwrap();
        assert!(matches!(cli.command, Commands::Scrape));
        assert_eq!(PathBuf::from("data"), cli.data_dir);
        assert_eq!(Duration::from_secs(3600), cli.cache_opts().cache_ttl);
        assert_eq!(TFilter::INFO, cli.tracing_level_filter());
        assert_eq!("Portland, OR", cli.geocode_opts().locality);
    }

    #[test]
    fn global_args_after_subcommand() {
        let cli = Cli::try_parse_opts([
            "burgerweek",
            "images",
            "--images-dir",
            "public/images",
            "--cache-ttl",
            "0s",
            "-q",
        ])
        .unwrap();
        assert_eq!(PathBuf::from("public/images"), cli.paths().images_dir);
        assert!(cli.cache_ttl.is_zero());
        assert_eq!(TFilter::WARN, cli.tracing_level_filter());
    }

    #[test]
    fn verbosity_levels() {
        let level = |args: &[&str]| {
            let mut argv = vec!["burgerweek"];
            argv.extend_from_slice(args);
            argv.push("scrape");
            Cli::try_parse_opts(argv).unwrap().tracing_level_filter()
        };
        assert_eq!(TFilter::INFO, level(&[]));
        assert_eq!(TFilter::DEBUG, level(&["-v"]));
        assert_eq!(TFilter::TRACE, level(&["-vv"]));
        assert_eq!(TFilter::ERROR, level(&["-qq"]));
        assert_eq!(TFilter::OFF, level(&["-qqq"]));
    }

    #[test]
    fn geocode_args() {
        let cli = Cli::try_parse_opts([
            "burgerweek",
            "geocode",
            "--provider",
            "google",
            "--api-key",
            "k",
            "--min-interval",
            "250ms",
        ])
        .unwrap();
        let opts = cli.geocode_opts();
        assert_eq!(geocode::ProviderKind::Google, opts.provider);
        assert_eq!(Some("k"), opts.api_key.as_deref());
        assert_eq!(Duration::from_millis(250), opts.min_interval);
        assert_eq!(10, opts.checkpoint_every);
    }

    #[test]
    fn run_with_cron() {
        let cli = Cli::try_parse_opts(["burgerweek", "run", "--cron", "0 0 */6 * * *"]).unwrap();
        match cli.command {
            Commands::Run { cron, .. } => assert_eq!(Some("0 0 */6 * * *".into()), cron),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn open_at() {
        let cli = Cli::try_parse_opts(["burgerweek", "open", "--at", "Fri 13:05"]).unwrap();
        match cli.command {
            Commands::Open { at } => assert_eq!(
                Some((Weekday::Fri, NaiveTime::from_hms_opt(13, 5, 0).unwrap())),
                at
            ),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_opts(["burgerweek", "open", "--at", "Funday 13:00"]).is_err());
        assert!(Cli::try_parse_opts(["burgerweek", "open", "--at", "13:00"]).is_err());
    }

    #[test]
    fn day_time() {
        assert_eq!(
            (Weekday::Sun, NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            parse_day_time(" sunday  09:00 ").unwrap()
        );
        assert!(parse_day_time("Mon 25:00").is_err());
    }
}
