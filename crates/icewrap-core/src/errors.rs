use std::path::PathBuf;

/// Fatal configuration problems. Raised during setup before the host is touched.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    BadExtraFile { index: usize, found: String },
    RemapUnsupported {
        version: String,
        dest: String,
        source: String,
    },
    MissingPackage { path: PathBuf },
    BadUrl { url: String },
    UnsupportedCompiler { compiler: String },
    BadVersion { value: String },
    BadConfigFile { path: PathBuf, message: String },
    MissingTool { tool: String, requested: String },
    NoArchiveCreated,
}

// Display is written by hand because `thiserror` would treat the `source`
// field of `RemapUnsupported` as an underlying error.
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadExtraFile { index, found } => write!(
                f,
                "[IW100] found incorrect icecream extra file at index {index}: {found}; \
                 extra files must be a single path or a (destination, source) pair"
            ),
            Self::RemapUnsupported {
                version,
                dest,
                source,
            } => write!(
                f,
                "[IW101] icecream {version} does not support extra file remapping ({dest} <- {source})"
            ),
            Self::MissingPackage { path } => write!(
                f,
                "[IW102] ICECC_VERSION is set to {}, but this file does not exist",
                path.display()
            ),
            Self::BadUrl { url } => {
                write!(f, "[IW103] ICECC_VERSION looks like a URL but does not parse: {url}")
            }
            Self::UnsupportedCompiler { compiler } => write!(
                f,
                "[IW104] remote preprocessing cannot be configured for compiler '{compiler}'"
            ),
            Self::BadVersion { value } => write!(f, "[IW105] invalid icecream version '{value}'"),
            Self::BadConfigFile { path, message } => {
                write!(f, "[IW106] {}: {message}", path.display())
            }
            Self::MissingTool { tool, requested } => {
                write!(f, "[IW107] unable to locate {tool} ({requested})")
            }
            Self::NoArchiveCreated => {
                write!(f, "[IW108] icecc-create-env did not report a created archive")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadExtraFile { .. } => "IW100",
            Self::RemapUnsupported { .. } => "IW101",
            Self::MissingPackage { .. } => "IW102",
            Self::BadUrl { .. } => "IW103",
            Self::UnsupportedCompiler { .. } => "IW104",
            Self::BadVersion { .. } => "IW105",
            Self::BadConfigFile { .. } => "IW106",
            Self::MissingTool { .. } => "IW107",
            Self::NoArchiveCreated => "IW108",
        }
    }
}
