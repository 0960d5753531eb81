use std::ffi::OsString;

use clap::{ArgAction, Parser};

/// Long flag names that are also accepted with a single dash (`-host`,
/// `-batchSize=500`), the way the tool has always been invoked.
const SINGLE_DASH_FLAGS: &[&str] = &[
    "host",
    "port",
    "pass",
    "db",
    "filter",
    "noscan",
    "batchSize",
    "n",
    "ttl",
    "output",
    "s",
    "tls",
    "cacert",
    "cert",
    "key",
];

/// Flags as typed by the user. Fields whose presence matters (`db`, `tls`,
/// `pass`) stay `Option` so the resolver can tell "not given" from a default.
#[derive(Debug, Parser)]
#[command(
    name = "redis-dump",
    version,
    about = "Dump Redis databases as RESP or plain commands, in parallel"
)]
pub struct RawArgs {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Server password
    #[arg(long)]
    pub pass: Option<OsString>,

    /// Only dump this database (default: all databases)
    #[arg(long)]
    pub db: Option<u8>,

    /// Key filter to use
    #[arg(long, default_value = "*")]
    pub filter: String,

    /// Use KEYS instead of SCAN - for Redis <=2.8
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub noscan: bool,

    /// HSET/RPUSH/SADD/ZADD only add 'batchSize' items at a time
    #[arg(long = "batchSize", default_value_t = 1000)]
    pub batch_size: usize,

    /// Parallel workers
    #[arg(long = "n", default_value_t = 10)]
    pub workers: usize,

    /// Preserve keys TTL
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub ttl: bool,

    /// Output type - can be resp or commands
    #[arg(long, default_value = "resp")]
    pub output: String,

    /// Silent mode (disable logging of progress / stats)
    #[arg(
        long = "s",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub silent: bool,

    /// Enable TLS
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub tls: Option<bool>,

    /// TLS CACert file path
    #[arg(long, default_value = "")]
    pub cacert: String,

    /// TLS Cert file path
    #[arg(long, default_value = "")]
    pub cert: String,

    /// TLS Key file path
    #[arg(long, default_value = "")]
    pub key: String,
}

fn normalize_flag(arg: OsString) -> OsString {
    let Some(text) = arg.to_str() else {
        return arg;
    };
    let Some(rest) = text.strip_prefix('-') else {
        return arg;
    };
    if rest.starts_with('-') {
        return arg;
    }
    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
    if SINGLE_DASH_FLAGS.contains(&name) {
        OsString::from(format!("-{text}"))
    } else {
        arg
    }
}

/// Rewrite `-flag` / `-flag=value` into the `--flag` form clap understands.
/// The program name and anything that is not a known flag are left untouched.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut normalized: Vec<OsString> = args.next().into_iter().collect();
    normalized.extend(args.map(normalize_flag));
    normalized
}

pub fn parse_from<I, T>(args: I) -> Result<RawArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    RawArgs::try_parse_from(normalize_args(args))
}

pub fn parse_cli() -> RawArgs {
    parse_from(std::env::args_os()).unwrap_or_else(|err| err.exit())
}
