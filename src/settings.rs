use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub policies: Policies,
    pub catalog: Catalog,
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policies {
    /// Directory scanned for `*.kdl` policy files. Default: policies
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// JSON file of records keyed by resource type. Default: catalog.json
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            path: PathBuf::from("catalog.json"),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default(
                "policies.dir",
                Policies::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "catalog.path",
                Catalog::default().path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("logging.filter", Logging::default().filter)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARRANT__POLICIES__DIR=/etc/warrant, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARRANT").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let s: Settings = cfg.try_deserialize().into_diagnostic()?;
        Ok(s)
    }
}
