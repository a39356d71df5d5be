//! Analyzer configuration. Settings are layered: built-in defaults, then an
//! optional TOML file, then `ANALYZER__SECTION__KEY` environment variables.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "analyzer.toml";

/// Prefix of the environment overrides
pub const ENV_PREFIX: &str = "ANALYZER";

/// Default cap on a request body. Images arrive base 64 encoded, a third
/// larger than the file
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Default tracing filter
pub const RUST_LOG: &str = "info,actix_web=info";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub models: ModelSettings,
    pub generation: GenerationSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Upper bound on one `/analyze` call. No bound when unset. A timed out
    /// analysis still runs to completion on the blocking pool and holds its
    /// engine until then; only the response is abandoned
    pub request_timeout_secs: Option<u64>,

    /// Largest accepted JSON body
    pub max_payload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 7860,
            request_timeout_secs: None,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

/// Where the exported BLIP checkpoints live
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub caption_model: PathBuf,
    pub caption_tokenizer: PathBuf,
    pub vqa_model: PathBuf,
    pub vqa_tokenizer: PathBuf,

    /// One of "cpu", "cuda" or "auto"
    pub device: String,

    /// Side length the engines resize images to
    pub image_size: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            caption_model: "models/blip-image-captioning-base.pt".into(),
            caption_tokenizer: "models/blip-image-captioning-base/tokenizer.json".into(),
            vqa_model: "models/blip-vqa-base.pt".into(),
            vqa_tokenizer: "models/blip-vqa-base/tokenizer.json".into(),
            device: "auto".into(),
            image_size: 384,
        }
    }
}

/// Caps on generated tokens per engine call
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub caption_max_new_tokens: usize,
    pub open_max_new_tokens: usize,

    /// Kept short, a yes/no reply is expected
    pub binary_max_new_tokens: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            caption_max_new_tokens: 50,
            open_max_new_tokens: 50,
            binary_max_new_tokens: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            filter: RUST_LOG.into(),
        }
    }
}

impl Settings {
    /// Load settings. An explicitly given file must exist; the default file is
    /// optional
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::env;
    use std::io::Write;

    fn from_toml(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = from_toml("");
        assert_eq!(settings.server.port, 7860);
        assert_eq!(settings.server.request_timeout_secs, None);
        assert_eq!(settings.server.max_payload_bytes, MAX_PAYLOAD_BYTES);
        assert_eq!(settings.models.image_size, 384);
        assert_eq!(settings.generation.caption_max_new_tokens, 50);
        assert_eq!(settings.generation.open_max_new_tokens, 50);
        assert_eq!(settings.generation.binary_max_new_tokens, 10);
        assert_eq!(settings.log.filter, RUST_LOG);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = from_toml(
            r#"
            [server]
            port = 9000
            request_timeout_secs = 30

            [models]
            device = "cpu"
            "#,
        );
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.request_timeout_secs, Some(30));
        assert_eq!(settings.models.device, "cpu");
        assert_eq!(
            settings.models.vqa_model,
            PathBuf::from("models/blip-vqa-base.pt")
        );
        assert_eq!(settings.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_load_layers_env_over_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            [server]
            port = 9000

            [generation]
            caption_max_new_tokens = 40
            binary_max_new_tokens = 7
            "#
        )
        .unwrap();

        env::set_var("ANALYZER__SERVER__PORT", "9100");
        env::set_var("ANALYZER__GENERATION__BINARY_MAX_NEW_TOKENS", "5");
        let settings = Settings::load(Some(file.path()));
        env::remove_var("ANALYZER__SERVER__PORT");
        env::remove_var("ANALYZER__GENERATION__BINARY_MAX_NEW_TOKENS");
        let settings = settings.unwrap();

        // environment beats the file
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.generation.binary_max_new_tokens, 5);
        // file beats the defaults
        assert_eq!(settings.generation.caption_max_new_tokens, 40);
        // untouched keys keep their defaults
        assert_eq!(settings.generation.open_max_new_tokens, 50);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.max_payload_bytes, MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("does/not/exist.toml"))).is_err());
    }
}
