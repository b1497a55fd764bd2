use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub token: String,
    pub conversation: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            token: String::new(),
            conversation: None,
        }
    }
}

/// Defaults, overridden by `chat_cli.toml`, overridden by environment
/// variables. Command-line flags are applied on top by the caller.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("chat_cli.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_values(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_TOKEN") {
        settings.token = v;
    }
    if let Ok(v) = std::env::var("CHAT_CONVERSATION") {
        settings.conversation = Some(v);
    }

    settings
}

fn apply_file_values(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("token") {
        settings.token = v.clone();
    }
    if let Some(v) = file_cfg.get("conversation") {
        settings.conversation = Some(v.clone());
    }
}
