use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADMIN_URL: &str = "http://127.0.0.1:2019";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// Every ambient input the tool depends on, made explicit so the core logic
/// never reaches for globals and tests can inject their own locations.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Candidate locations of the Caddy binary, probed in order.
    pub binary_paths: Vec<PathBuf>,
    /// Process-table name of the server, also the PATH fallback binary name.
    pub process_name: String,
    /// The JSON configuration file Caddy persists (autosave.json).
    pub config_file: PathBuf,
    /// Candidate Caddyfile locations for the `adapt` fallback.
    pub caddyfile_paths: Vec<PathBuf>,
    /// Admin API base URL, used only as a fallback read path.
    pub admin_url: String,
    pub probe_timeout: Duration,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("could not determine a home directory")]
    NoHomeDir,
    #[error("failed to read settings file '{path}': {detail}")]
    Read { path: String, detail: String },
    #[error("TOML parse error in '{path}': {detail}")]
    TomlParse { path: String, detail: String },
}

/// Optional on-disk overrides. Unknown keys are rejected so typos surface
/// instead of silently falling back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub caddy_bin: Option<String>,
    pub binary_paths: Option<Vec<String>>,
    pub config_file: Option<String>,
    pub caddyfile_paths: Option<Vec<String>>,
    pub admin_url: Option<String>,
    pub probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Overrides {
    bin: Option<String>,
    config_file: Option<String>,
    admin_url: Option<String>,
}

impl Overrides {
    fn from_env() -> Self {
        Self {
            bin: std::env::var("CADDYCTL_BIN").ok(),
            config_file: std::env::var("CADDYCTL_CONFIG_FILE").ok(),
            admin_url: std::env::var("CADDYCTL_ADMIN_URL").ok(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        let file = read_settings_file()?;
        Self::build(file, Overrides::from_env())
    }

    fn build(file: Option<SettingsFile>, overrides: Overrides) -> Result<Self, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
        let data = dirs::data_dir().ok_or(SettingsError::NoHomeDir)?;

        let mut settings = Self {
            binary_paths: vec![
                PathBuf::from("/opt/homebrew/bin/caddy"),
                PathBuf::from("/usr/local/bin/caddy"),
            ],
            process_name: "caddy".to_string(),
            config_file: data.join("Caddy").join("autosave.json"),
            caddyfile_paths: vec![
                PathBuf::from("/opt/homebrew/etc/Caddyfile"),
                PathBuf::from("/usr/local/etc/Caddyfile"),
                PathBuf::from("/etc/caddy/Caddyfile"),
                home.join("Caddyfile"),
            ],
            admin_url: DEFAULT_ADMIN_URL.to_string(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        };

        if let Some(file) = file {
            settings.apply_file(file);
        }

        if let Some(bin) = overrides.bin {
            settings.force_binary(&bin);
        }
        if let Some(config_file) = overrides.config_file {
            settings.config_file = PathBuf::from(config_file);
        }
        if let Some(admin_url) = overrides.admin_url {
            settings.admin_url = admin_url;
        }

        Ok(settings)
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(paths) = file.binary_paths {
            self.binary_paths = paths.into_iter().map(PathBuf::from).collect();
        }
        if let Some(bin) = file.caddy_bin {
            self.force_binary(&bin);
        }
        if let Some(config_file) = file.config_file {
            self.config_file = PathBuf::from(config_file);
        }
        if let Some(paths) = file.caddyfile_paths {
            self.caddyfile_paths = paths.into_iter().map(PathBuf::from).collect();
        }
        if let Some(admin_url) = file.admin_url {
            self.admin_url = admin_url;
        }
        if let Some(ms) = file.probe_timeout_ms {
            self.probe_timeout = Duration::from_millis(ms);
        }
    }

    /// Pin the binary to a single path and take the process name from it.
    fn force_binary(&mut self, bin: &str) {
        let path = PathBuf::from(bin);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.process_name = name.to_string();
        }
        self.binary_paths = vec![path];
    }

    /// First configured path that is an executable file, else the bare process
    /// name so the spawn resolves through the inherited PATH.
    pub fn resolve_binary(&self) -> PathBuf {
        for path in &self.binary_paths {
            if is_executable(path) {
                return path.clone();
            }
        }
        PathBuf::from(&self.process_name)
    }
}

pub fn parse_settings_file(content: &str, path: &str) -> Result<SettingsFile, SettingsError> {
    toml::from_str(content).map_err(|e| SettingsError::TomlParse {
        path: path.to_string(),
        detail: e.to_string(),
    })
}

fn read_settings_file() -> Result<Option<SettingsFile>, SettingsError> {
    let path = match std::env::var("CADDYCTL_SETTINGS") {
        Ok(p) => PathBuf::from(p),
        Err(_) => {
            let Some(base) = dirs::config_dir() else {
                return Ok(None);
            };
            base.join("caddyctl").join("config.toml")
        }
    };

    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| SettingsError::Read {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    parse_settings_file(&content, &path.display().to_string()).map(Some)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
