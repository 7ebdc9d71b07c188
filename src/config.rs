use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment fallback for the provider key when none is stored.
pub const API_KEY_ENV: &str = "SMARTDO_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "gemini")]
    #[value(name = "gemini")]
    Gemini,
    /// Any endpoint speaking the OpenAI chat-completions protocol.
    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Overrides the decomposition template; `{{goal}}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_prompt: Option<String>,
    /// Overrides the summary template; `{{groupName}}`, `{{taskList}}` and
    /// `{{detailLevel}}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// Locally stored stand-in for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings file {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }
}

impl Settings {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if data.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stored key first, then the environment value.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Option<String> {
        non_blank(self.api_key.clone()).or_else(|| non_blank(env_value))
    }

    pub fn api_key_from_env(&self) -> Option<String> {
        self.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }

    /// Key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> Option<String> {
        let key = non_blank(self.api_key.clone())?;
        let visible: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Some(format!("****{}", visible))
    }
}

impl Profile {
    pub fn mock(name: Option<String>) -> Profile {
        let name = non_blank(name).unwrap_or_else(|| "Local User".to_string());
        let avatar = format!(
            "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
            name.replace(' ', "-")
        );
        Profile {
            name,
            avatar: Some(avatar),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("settings.yml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.provider, Provider::Gemini);
    }

    #[test]
    fn settings_round_trip_through_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cfg").join("settings.yml");
        let settings = Settings {
            provider: Provider::OpenAi,
            api_key: Some("sk-test".into()),
            base_url: Some("http://localhost:8080/v1".into()),
            profile: Some(Profile::mock(Some("Ada".into()))),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("provider: openai"));
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn stored_key_wins_over_environment() {
        let settings = Settings {
            api_key: Some("stored".into()),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve_api_key(Some("env".into())).as_deref(),
            Some("stored")
        );
        let blank = Settings {
            api_key: Some("  ".into()),
            ..Settings::default()
        };
        assert_eq!(blank.resolve_api_key(Some("env".into())).as_deref(), Some("env"));
        assert_eq!(blank.resolve_api_key(None), None);
    }

    #[test]
    fn masked_key_shows_tail_only() {
        let settings = Settings {
            api_key: Some("abcdef123456".into()),
            ..Settings::default()
        };
        assert_eq!(settings.masked_api_key().as_deref(), Some("****3456"));
    }

    #[test]
    fn mock_profile_defaults_name() {
        assert_eq!(Profile::mock(None).name, "Local User");
        assert_eq!(Profile::mock(Some(" Ada ".into())).name, "Ada");
    }
}
