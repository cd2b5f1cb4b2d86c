//! Loads the middleware shim's process-wide configuration from an INI file.
//!
//! The source representation is reflection-free on purpose: [`Config`] has a
//! fixed, enumerated set of fields, each parsed and validated by hand. There
//! is no accessor that can observe a "not yet loaded" value — the only way
//! to get a [`Config`] is [`Config::load`], which returns a fully validated
//! value or an error. Once built, a `Config` is immutable and `Clone`, so it
//! can be shared by reference into as many endpoint constructors as needed.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use middleware_protocol::MTU_MIN;
use thiserror::Error;

const SECTION: &str = "middleware_configuration";
const OPTIONS: &[&str] = &["mtu", "fragment_timeout", "congestion_algorithm", "echo_config_path"];

/// The default file name this crate looks for in the working directory.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "middleware_config.ini";

/// Errors produced while loading or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read at all.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file did not parse as INI.
    #[error("failed to parse config file {path} as ini: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parser error.
        #[source]
        source: ini::ParseError,
    },
    /// A section other than `[middleware_configuration]` was present, or
    /// the required section was missing entirely.
    #[error("expected exactly one section named [{SECTION}], found: {found:?}")]
    UnknownSection {
        /// Section names actually present in the file.
        found: Vec<String>,
    },
    /// An option name not in [`OPTIONS`] appeared in the section.
    #[error("unknown config option '{option}'")]
    UnknownOption {
        /// The unrecognized option name.
        option: String,
    },
    /// A required option was missing from the section.
    #[error("missing required config option '{option}'")]
    MissingOption {
        /// The missing option name.
        option: String,
    },
    /// An option's value could not be coerced to its expected type.
    #[error("config option '{option}' has invalid value '{value}' for its type")]
    TypeError {
        /// The option whose value failed to parse.
        option: String,
        /// The raw string value that failed to parse.
        value: String,
    },
    /// `mtu` was present and well-typed, but smaller than [`MTU_MIN`].
    #[error("mtu {mtu} is below the minimum of {MTU_MIN}")]
    InvalidMtu {
        /// The out-of-range MTU value.
        mtu: u32,
    },
}

/// Fully validated, immutable process configuration.
///
/// Construct with [`Config::load`]; there is no `Default` impl and no global
/// accessor, so a caller can never observe an unset `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    mtu: u32,
    fragment_timeout: Duration,
    congestion_algorithm: String,
    echo_config_path: bool,
}

impl Config {
    /// Default link MTU used by both endpoint types, in bytes.
    #[must_use]
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Age-out threshold for partial datagrams in the reassembly table.
    #[must_use]
    pub fn fragment_timeout(&self) -> Duration {
        self.fragment_timeout
    }

    /// Congestion-control algorithm name, passed verbatim to the reliable
    /// endpoint's socket option.
    #[must_use]
    pub fn congestion_algorithm(&self) -> &str {
        &self.congestion_algorithm
    }

    /// Whether the resolved config file path should be logged once after
    /// loading.
    #[must_use]
    pub fn echo_config_path(&self) -> bool {
        self.echo_config_path
    }

    /// Loads and validates configuration from the INI file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid INI,
    /// has sections/options other than the single recognized
    /// `[middleware_configuration]` section and its four keys, has a
    /// value that fails to parse for its expected type, or has an `mtu`
    /// below [`MTU_MIN`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_display = path.display().to_string();

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_display.clone(),
            source,
        })?;

        let ini = ini::Ini::load_from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path_display.clone(),
            source,
        })?;

        let sections: Vec<String> = ini
            .sections()
            .filter_map(|s| s.map(str::to_owned))
            .collect();
        if sections != [SECTION] {
            return Err(ConfigError::UnknownSection { found: sections });
        }

        let section = ini.section(Some(SECTION)).expect("checked above");
        for (key, _) in section.iter() {
            if !OPTIONS.contains(&key) {
                return Err(ConfigError::UnknownOption {
                    option: key.to_owned(),
                });
            }
        }

        let mtu = parse_required(section, "mtu")?;
        if mtu < MTU_MIN {
            return Err(ConfigError::InvalidMtu { mtu });
        }

        let fragment_timeout_secs: u64 = parse_required(section, "fragment_timeout")?;
        let congestion_algorithm = required_str(section, "congestion_algorithm")?.to_owned();
        let echo_config_path = parse_required(section, "echo_config_path")?;

        let config = Self {
            mtu,
            fragment_timeout: Duration::from_secs(fragment_timeout_secs),
            congestion_algorithm,
            echo_config_path,
        };

        if config.echo_config_path {
            tracing::info!(path = %path_display, "resolved middleware config path");
        }

        Ok(config)
    }

    /// Loads [`DEFAULT_CONFIG_FILE_NAME`] from `dir`.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(dir.as_ref().join(DEFAULT_CONFIG_FILE_NAME))
    }

    /// Loads [`DEFAULT_CONFIG_FILE_NAME`] from the working directory,
    /// falling back to the directory containing the running executable if
    /// it isn't there.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the running executable's path can't
    /// be resolved. Otherwise see [`Config::load`].
    pub fn load_default() -> Result<Self, ConfigError> {
        let exe_dir = std::env::current_exe()
            .map_err(|source| ConfigError::Io {
                path: DEFAULT_CONFIG_FILE_NAME.to_owned(),
                source,
            })?
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Self::load(resolve_default_path(
            Path::new(DEFAULT_CONFIG_FILE_NAME),
            &exe_dir,
        ))
    }
}

/// Picks the default config file's path: `cwd_candidate` (the plain file
/// name, resolved against the working directory) if a file exists there,
/// otherwise `DEFAULT_CONFIG_FILE_NAME` joined onto `exe_dir`.
fn resolve_default_path(cwd_candidate: &Path, exe_dir: &Path) -> PathBuf {
    if cwd_candidate.is_file() {
        cwd_candidate.to_path_buf()
    } else {
        exe_dir.join(DEFAULT_CONFIG_FILE_NAME)
    }
}

fn required_str<'a>(section: &'a ini::Properties, option: &str) -> Result<&'a str, ConfigError> {
    section.get(option).ok_or_else(|| ConfigError::MissingOption {
        option: option.to_owned(),
    })
}

fn parse_required<T: std::str::FromStr>(
    section: &ini::Properties,
    option: &str,
) -> Result<T, ConfigError> {
    let raw = required_str(section, option)?;
    raw.parse().map_err(|_| ConfigError::TypeError {
        option: option.to_owned(),
        value: raw.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const VALID: &str = "
[middleware_configuration]
mtu = 1500
fragment_timeout = 30
congestion_algorithm = cubic
echo_config_path = false
";

    #[test]
    fn loads_valid_config() {
        let file = write_ini(VALID);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(1500, config.mtu());
        assert_eq!(Duration::from_secs(30), config.fragment_timeout());
        assert_eq!("cubic", config.congestion_algorithm());
        assert!(!config.echo_config_path());
    }

    #[test]
    fn echoes_resolved_path_when_configured_to() {
        let _ = tracing_subscriber::fmt::try_init();
        let file = write_ini(
            "
[middleware_configuration]
mtu = 1500
fragment_timeout = 30
congestion_algorithm = cubic
echo_config_path = true
",
        );
        let config = Config::load(file.path()).unwrap();
        assert!(config.echo_config_path());
    }

    #[test]
    fn rejects_unknown_section() {
        let file = write_ini("[bogus]\nmtu = 1500\n");
        assert_matches!(Config::load(file.path()), Err(ConfigError::UnknownSection { .. }));
    }

    #[test]
    fn rejects_unknown_option() {
        let file = write_ini(
            "
[middleware_configuration]
mtu = 1500
fragment_timeout = 30
congestion_algorithm = cubic
echo_config_path = false
bogus_option = 1
",
        );
        assert_matches!(Config::load(file.path()), Err(ConfigError::UnknownOption { .. }));
    }

    #[test]
    fn rejects_non_numeric_mtu() {
        let file = write_ini(
            "
[middleware_configuration]
mtu = not-a-number
fragment_timeout = 30
congestion_algorithm = cubic
echo_config_path = false
",
        );
        assert_matches!(Config::load(file.path()), Err(ConfigError::TypeError { .. }));
    }

    #[test]
    fn rejects_mtu_below_minimum() {
        let file = write_ini(
            "
[middleware_configuration]
mtu = 10
fragment_timeout = 30
congestion_algorithm = cubic
echo_config_path = false
",
        );
        assert_matches!(Config::load(file.path()), Err(ConfigError::InvalidMtu { mtu: 10 }));
    }

    #[test]
    fn rejects_missing_option() {
        let file = write_ini(
            "
[middleware_configuration]
mtu = 1500
fragment_timeout = 30
congestion_algorithm = cubic
",
        );
        assert_matches!(Config::load(file.path()), Err(ConfigError::MissingOption { .. }));
    }

    #[test]
    fn default_path_prefers_the_working_directory_candidate_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let cwd_candidate = dir.path().join(DEFAULT_CONFIG_FILE_NAME);
        std::fs::write(&cwd_candidate, VALID).unwrap();

        let resolved = resolve_default_path(&cwd_candidate, Path::new("/nonexistent/exe/dir"));
        assert_eq!(cwd_candidate, resolved);
    }

    #[test]
    fn default_path_falls_back_to_the_executable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing_cwd_candidate = dir.path().join("not-there.ini");
        let exe_dir = tempfile::tempdir().unwrap();

        let resolved = resolve_default_path(&missing_cwd_candidate, exe_dir.path());
        assert_eq!(exe_dir.path().join(DEFAULT_CONFIG_FILE_NAME), resolved);
    }
}
