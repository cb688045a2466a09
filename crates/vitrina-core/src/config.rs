use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{command::RemoteConfig, domain::ChatId, errors::Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Credential + bound chat for one polling channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelCredentials {
    pub token: String,
    pub chat_id: ChatId,
}

/// Typed configuration, loaded from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Channels
    pub primary: ChannelCredentials,
    pub auxiliary: Option<ChannelCredentials>,
    pub api_url: String,

    // Poll loop timing
    pub poll_timeout: Duration,
    pub inter_poll_delay: Duration,
    pub backoff_delay: Duration,
    pub identity_retry_initial: Duration,
    pub identity_retry_max: Duration,

    // Collaborators
    pub storage_path: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,

    // Limits
    pub chat_history_limit: usize,
    pub activity_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let primary_token = env_str("PRIMARY_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("PRIMARY_BOT_TOKEN environment variable is required".to_string())
            })?;
        let primary_chat = env_str("PRIMARY_CHAT_ID")
            .and_then(|s| parse_chat_id(&s))
            .ok_or_else(|| {
                Error::Config(
                    "PRIMARY_CHAT_ID environment variable is required (numeric)".to_string(),
                )
            })?;

        // Auxiliary channel only exists when both halves are present.
        let auxiliary = match (
            env_str("AUX_BOT_TOKEN").and_then(non_empty),
            env_str("AUX_CHAT_ID").and_then(|s| parse_chat_id(&s)),
        ) {
            (Some(token), Some(chat_id)) => Some(ChannelCredentials { token, chat_id }),
            (Some(_), None) => {
                tracing::warn!("AUX_BOT_TOKEN set without a valid AUX_CHAT_ID; auxiliary channel disabled");
                None
            }
            _ => None,
        };

        let api_url = env_str("TELEGRAM_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let poll_timeout = Duration::from_secs(env_u64("POLL_TIMEOUT_SECS").unwrap_or(50));
        let inter_poll_delay =
            Duration::from_millis(env_u64("INTER_POLL_DELAY_MS").unwrap_or(100));
        let backoff_delay = Duration::from_millis(env_u64("BACKOFF_DELAY_MS").unwrap_or(15_000));
        let identity_retry_initial =
            Duration::from_millis(env_u64("IDENTITY_RETRY_INITIAL_MS").unwrap_or(1_000));
        let identity_retry_max =
            Duration::from_millis(env_u64("IDENTITY_RETRY_MAX_MS").unwrap_or(60_000));

        let data_dir = PathBuf::from(env_str("DATA_DIR").unwrap_or("/tmp/vitrina".to_string()));
        fs::create_dir_all(&data_dir)?;

        let storage_path =
            env_path("STORAGE_PATH").unwrap_or_else(|| data_dir.join("storage.json"));
        let snapshot_path =
            Some(env_path("SNAPSHOT_PATH").unwrap_or_else(|| data_dir.join("snapshot.json")));
        let audit_log_path = Some(env_path("AUDIT_LOG_PATH").unwrap_or_else(|| data_dir.join("audit.log")));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        let chat_history_limit = env_usize("CHAT_HISTORY_LIMIT").unwrap_or(500);
        let activity_capacity = env_usize("ACTIVITY_CAPACITY").unwrap_or(100);

        Ok(Self {
            primary: ChannelCredentials {
                token: primary_token,
                chat_id: primary_chat,
            },
            auxiliary,
            api_url,
            poll_timeout,
            inter_poll_delay,
            backoff_delay,
            identity_retry_initial,
            identity_retry_max,
            storage_path,
            snapshot_path,
            audit_log_path,
            audit_log_json,
            chat_history_limit,
            activity_capacity,
        })
    }

    /// Overlay credentials received through a remote config message.
    ///
    /// An invalid primary chat id leaves the primary channel untouched. An
    /// empty auxiliary token, or one without a valid chat id, disables the
    /// auxiliary channel.
    pub fn with_remote(&self, remote: &RemoteConfig) -> Self {
        let mut out = self.clone();

        if let Some(chat_id) = parse_chat_id(&remote.chat_id) {
            if !remote.token.trim().is_empty() {
                out.primary = ChannelCredentials {
                    token: remote.token.trim().to_string(),
                    chat_id,
                };
            }
        }

        out.auxiliary = if remote.aux_token.trim().is_empty() {
            None
        } else {
            let aux = parse_chat_id(&remote.aux_chat_id).map(|chat_id| ChannelCredentials {
                token: remote.aux_token.trim().to_string(),
                chat_id,
            });
            if aux.is_none() {
                tracing::warn!(
                    aux_chat_id = %remote.aux_chat_id,
                    "remote auxiliary token without a valid chat id; auxiliary channel disabled"
                );
            }
            aux
        };

        out
    }
}

pub fn parse_chat_id(s: &str) -> Option<ChatId> {
    s.trim().parse::<i64>().ok().map(ChatId)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        primary: ChannelCredentials {
            token: "111:primary".to_string(),
            chat_id: ChatId(100),
        },
        auxiliary: Some(ChannelCredentials {
            token: "222:aux".to_string(),
            chat_id: ChatId(200),
        }),
        api_url: DEFAULT_API_URL.to_string(),
        poll_timeout: Duration::from_secs(50),
        inter_poll_delay: Duration::from_millis(100),
        backoff_delay: Duration::from_millis(15_000),
        identity_retry_initial: Duration::from_millis(1_000),
        identity_retry_max: Duration::from_millis(60_000),
        storage_path: "/tmp/vitrina-test-storage.json".into(),
        snapshot_path: None,
        audit_log_path: None,
        audit_log_json: false,
        chat_history_limit: 500,
        activity_capacity: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_config_replaces_primary_and_aux() {
        let cfg = test_config();
        let next = cfg.with_remote(&RemoteConfig {
            token: "999:new".into(),
            chat_id: "-5".into(),
            aux_token: "888:aux".into(),
            aux_chat_id: "6".into(),
        });
        assert_eq!(next.primary.token, "999:new");
        assert_eq!(next.primary.chat_id, ChatId(-5));
        assert_eq!(
            next.auxiliary,
            Some(ChannelCredentials {
                token: "888:aux".into(),
                chat_id: ChatId(6)
            })
        );
    }

    #[test]
    fn remote_config_without_aux_disables_it() {
        let cfg = test_config();
        let next = cfg.with_remote(&RemoteConfig {
            token: "999:new".into(),
            chat_id: "5".into(),
            aux_token: String::new(),
            aux_chat_id: String::new(),
        });
        assert!(next.auxiliary.is_none());
    }

    #[test]
    fn remote_config_with_bad_chat_keeps_primary() {
        let cfg = test_config();
        let next = cfg.with_remote(&RemoteConfig {
            token: "999:new".into(),
            chat_id: "not-a-number".into(),
            aux_token: String::new(),
            aux_chat_id: String::new(),
        });
        assert_eq!(next.primary, cfg.primary);
    }

    #[test]
    fn remote_aux_token_with_bad_chat_disables_aux() {
        let cfg = test_config();
        let next = cfg.with_remote(&RemoteConfig {
            token: "111:primary".into(),
            chat_id: "100".into(),
            aux_token: "333:aux".into(),
            aux_chat_id: "abc".into(),
        });
        // The old auxiliary credential must not come back.
        assert_eq!(next.auxiliary, None);
        assert_eq!(next.primary, cfg.primary);
    }
}
