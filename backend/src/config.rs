// backend/src/config.rs

use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct Config {
    // API Keys
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_api_base_url")]
    pub gemini_api_base_url: String,

    // Model Configuration
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    pub generation_temperature: Option<f32>,

    // Book content source: local file by default, HTTP URL when set
    #[serde(default = "default_book_path")]
    pub book_path: String,
    pub book_url: Option<String>,

    // Server Config
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gemini_api_base_url", &self.gemini_api_base_url)
            .field("chat_model", &self.chat_model)
            .field("generation_temperature", &self.generation_temperature)
            .field("book_path", &self.book_path)
            .field("book_url", &self.book_url)
            .field("allowed_origins", &self.allowed_origins)
            .field("port", &self.port)
            .finish()
    }
}

fn default_gemini_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

// The generation model must match the model the content cache was created
// for, so the full "models/..." resource name is carried here.
fn default_chat_model() -> String {
    "models/gemini-3-flash-preview".to_string()
}

fn default_book_path() -> String {
    "book.md".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:3001".to_string(),
        "https://zippel-gpt.vercel.app".to_string(),
    ]
}

const fn default_port() -> u16 {
    8000
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `anyhow::Error` if environment variable parsing fails,
    /// such as when a variable has an invalid format.
    pub fn load() -> Result<Self, anyhow::Error> {
        envy::from_env::<Self>().map_err(anyhow::Error::from)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base_url: default_gemini_api_base_url(),
            chat_model: default_chat_model(),
            generation_temperature: None,
            book_path: default_book_path(),
            book_url: None,
            allowed_origins: default_allowed_origins(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(
            config.gemini_api_base_url,
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(config.chat_model, "models/gemini-3-flash-preview");
        assert_eq!(config.book_path, "book.md");
        assert!(config.book_url.is_none());
        assert_eq!(config.port, 8000);
        assert_eq!(config.allowed_origins.len(), 5);
        assert!(
            config
                .allowed_origins
                .contains(&"https://zippel-gpt.vercel.app".to_string())
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = Config {
            gemini_api_key: Some("super-secret".to_string()),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
