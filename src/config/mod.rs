use std::ffi::OsStr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cli::RawArgs;
use crate::redis_ops::protocol::{command_serializer, resp_serializer, Serializer};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Failed parsing parameter flag: output can only be resp or commands (got '{0}')")]
    OutputFormat(String),

    #[error("password cannot be embedded in a connection string: {0}")]
    Credential(String),

    #[error("invalid value for -{flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
}

/// Which databases a dump covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTarget {
    AllDatabases,
    SingleDatabase(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Commands,
    Resp,
}

impl OutputFormat {
    pub fn serializer(self) -> Serializer {
        match self {
            OutputFormat::Resp => resp_serializer,
            OutputFormat::Commands => command_serializer,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resp" => Ok(OutputFormat::Resp),
            "commands" => Ok(OutputFormat::Commands),
            other => Err(ConfigurationError::OutputFormat(other.to_string())),
        }
    }
}

/// Certificate material for a TLS connection. Missing paths are left for the
/// connection layer to interpret (system roots, no client certificate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Resolved, immutable description of one dump invocation.
#[derive(Debug, Clone)]
pub struct DumpPlan {
    pub target: DumpTarget,
    pub host: String,
    pub port: u16,
    /// Percent-encoded, ready to be placed in a connection URL.
    pub credential: Option<String>,
    pub tls: Option<TlsSettings>,
    pub filter: String,
    pub workers: usize,
    pub preserve_ttl: bool,
    pub batch_size: usize,
    pub use_keys_command: bool,
    pub output: OutputFormat,
    pub quiet: bool,
}

impl DumpPlan {
    pub fn serializer(&self) -> Serializer {
        self.output.serializer()
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

pub fn encode_credential(pass: &OsStr) -> Result<Option<String>, ConfigurationError> {
    let pass = pass
        .to_str()
        .ok_or_else(|| ConfigurationError::Credential("password is not valid UTF-8".to_string()))?;
    if pass.is_empty() {
        return Ok(None);
    }
    Ok(Some(urlencoding::encode(pass).into_owned()))
}

fn at_least_one(flag: &'static str, value: usize) -> Result<usize, ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::InvalidValue {
            flag,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Turn parsed flags into a [`DumpPlan`].
///
/// Database selection and TLS are decided by whether the flag was given at
/// all, so `-db 0` selects database 0 and `-tls=false` still enables TLS.
pub fn resolve(args: RawArgs) -> Result<DumpPlan, ConfigurationError> {
    let output: OutputFormat = args.output.parse()?;

    let target = match args.db {
        Some(db) => DumpTarget::SingleDatabase(db),
        None => DumpTarget::AllDatabases,
    };

    let tls = args.tls.map(|_| TlsSettings {
        ca_cert: non_empty_path(&args.cacert),
        cert: non_empty_path(&args.cert),
        key: non_empty_path(&args.key),
    });

    let credential = match &args.pass {
        Some(pass) => encode_credential(pass)?,
        None => None,
    };

    Ok(DumpPlan {
        target,
        host: args.host,
        port: args.port,
        credential,
        tls,
        filter: args.filter,
        workers: at_least_one("n", args.workers)?,
        preserve_ttl: args.ttl,
        batch_size: at_least_one("batchSize", args.batch_size)?,
        use_keys_command: args.noscan,
        output,
        quiet: args.silent,
    })
}
