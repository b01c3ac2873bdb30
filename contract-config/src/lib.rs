#![forbid(unsafe_code)]
//! Configuration shared by the contract sync service and its cli.

use std::{
    fmt,
    io::{self, Error, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::LevelFilter;
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

pub const DEFAULT_UPSTREAM_SERVER: &str = "http://localhost:8080";
pub const DEFAULT_UPSTREAM_PORT: u16 = 8080;
pub const DEFAULT_DB_NAME: &str = "contracts.db";
pub const DEFAULT_LOGFILE_NAME: &str = "contract-sync.debug.log";
pub const DEFAULT_DATA_DIR_NAME: &str = ".contract-sync";
/// Maximum number of blocks requested from the block store in one catch-up batch.
pub const CATCH_UP_BATCH_SIZE: u64 = 200;

/// Builds the upstream uri from an optional user supplied server string.
///
/// A missing scheme defaults to `http` and a missing port to [`DEFAULT_UPSTREAM_PORT`].
pub fn construct_upstream_uri(server: Option<String>) -> Result<http::Uri, http::uri::InvalidUri> {
    match server {
        Some(s) => {
            let mut s = if s.starts_with("http") {
                s
            } else {
                "http://".to_string() + &s
            };
            let uri: http::Uri = s.parse()?;
            if uri.port().is_none() {
                s += &format!(":{}", DEFAULT_UPSTREAM_PORT);
            }
            s
        }
        None => DEFAULT_UPSTREAM_SERVER.to_string(),
    }
    .parse()
}

/// Which block id a catch-up pass paginates against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CatchUpAnchor {
    /// Resolve the chain head once at the start of every pass.
    #[default]
    ChainHead,
    /// Page through the ancestors of the irreversible block the pass is waiting for.
    /// Those ancestors are final, so a reorg above them cannot change the fetched view.
    IrreversibleTarget,
}

impl fmt::Display for CatchUpAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatchUpAnchor::ChainHead => "head",
            CatchUpAnchor::IrreversibleTarget => "target",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CatchUpAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => Ok(CatchUpAnchor::ChainHead),
            "target" => Ok(CatchUpAnchor::IrreversibleTarget),
            other => Err(format!(
                "unknown catch-up anchor '{other}', expected 'head' or 'target'"
            )),
        }
    }
}

/// Configuration data that is necessary and sufficient for running the sync service.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub upstream_uri: http::Uri,
    /// The directory where the database and logfiles will be created. By default, this will be in ~/.contract-sync
    pub data_dir: Option<PathBuf>,
    /// The name of the database. This will be created in the `data_dir`.
    pub db_name: PathBuf,
    /// The filename of the logfile. This will be created in the `data_dir`.
    pub logfile_name: PathBuf,
    pub batch_size: u64,
    pub catch_up_anchor: CatchUpAnchor,
}

impl SyncConfig {
    pub fn new(upstream_uri: http::Uri, data_dir: Option<PathBuf>) -> SyncConfig {
        SyncConfig {
            upstream_uri,
            data_dir,
            db_name: DEFAULT_DB_NAME.into(),
            logfile_name: DEFAULT_LOGFILE_NAME.into(),
            batch_size: CATCH_UP_BATCH_SIZE,
            catch_up_anchor: CatchUpAnchor::default(),
        }
    }

    // Create an unconnected (to any server) config for tests and local database queries
    pub fn create_unconnected(dir: Option<PathBuf>) -> SyncConfig {
        Self::new(http::Uri::default(), dir)
    }

    pub fn set_data_dir(&mut self, dir_str: String) {
        self.data_dir = Some(PathBuf::from(dir_str));
    }

    /// The batch size actually used by catch-up, never zero and never above [`CATCH_UP_BATCH_SIZE`].
    pub fn effective_batch_size(&self) -> u64 {
        self.batch_size.clamp(1, CATCH_UP_BATCH_SIZE)
    }

    /// Build the Logging config
    pub fn get_log_config(&self) -> io::Result<Config> {
        let window_size = 3; // log0, log1, log2
        let fixed_window_roller = FixedWindowRoller::builder()
            .build("contract-sync-log{}", window_size)
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))?;
        let size_limit = 5 * 1024 * 1024; // 5MB as max log file size to roll
        let size_trigger = SizeTrigger::new(size_limit);
        let compound_policy =
            CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

        Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                    .build(
                        "logfile",
                        Box::new(
                            RollingFileAppender::builder()
                                .encoder(Box::new(PatternEncoder::new("{d} {l}::{m}{n}")))
                                .build(self.get_log_path()?, Box::new(compound_policy))?,
                        ),
                    ),
            )
            .build(
                Root::builder()
                    .appender("logfile")
                    .build(LevelFilter::Debug),
            )
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))
    }

    /// Resolves the data directory, creating it when it does not exist yet.
    pub fn get_data_dir(&self) -> io::Result<Box<Path>> {
        let data_location = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let Some(mut home) = dirs::home_dir() else {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "Couldn't determine home directory",
                    ));
                };
                home.push(DEFAULT_DATA_DIR_NAME);
                home
            }
        };

        std::fs::create_dir_all(&data_location)?;

        Ok(data_location.into_boxed_path())
    }

    pub fn get_db_path(&self) -> io::Result<Box<Path>> {
        let mut db_path = self.get_data_dir()?.into_path_buf();
        db_path.push(&self.db_name);

        Ok(db_path.into_boxed_path())
    }

    pub fn db_exists(&self) -> bool {
        self.get_db_path().map(|path| path.exists()).unwrap_or(false)
    }

    pub fn get_log_path(&self) -> io::Result<Box<Path>> {
        let mut log_path = self.get_data_dir()?.into_path_buf();
        log_path.push(&self.logfile_name);

        Ok(log_path.into_boxed_path())
    }
}
