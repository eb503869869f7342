//! Daemon configuration: JSON file + environment + CLI overrides.

use amb_core::{BridgeError, BridgeResult, KeyDigest};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure (camelCase keys on disk).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    socket_path: Option<PathBuf>,
    #[serde(default = "default_socket_mode")]
    socket_mode: String,
    #[serde(default = "default_http_host")]
    http_host: String,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_max_frame_bytes")]
    max_frame_bytes: usize,
    #[serde(default = "default_queue_limit")]
    queue_limit: usize,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    clients: Vec<ClientDescriptor>,
    #[serde(default)]
    admin_token_hash: Option<String>,
}

/// One registered client as it appears in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key_hash: String,
    #[serde(default)]
    pub can_send_to: Vec<String>,
}

fn default_socket_mode() -> String {
    // group-accessible so members of a shared group can connect
    "0660".to_string()
}
fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8787
}
fn default_max_frame_bytes() -> usize {
    65536
}
fn default_queue_limit() -> usize {
    500
}

/// Runtime directory beside the daemon binary; default home for the socket
/// and log file.
fn runtime_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("run")))
        .unwrap_or_else(|| PathBuf::from("run"))
}

/// Resolved daemon configuration (defaults applied, overrides merged,
/// admin hash parsed). Frozen after [`Config::load`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the local stream socket.
    pub socket_path: PathBuf,
    /// File mode applied to the socket after bind.
    pub socket_mode: u32,
    /// HTTP control plane bind host (loopback unless overridden).
    pub http_host: String,
    /// HTTP control plane port.
    pub http_port: u16,
    /// Maximum serialized frame size in bytes.
    pub max_frame_bytes: usize,
    /// Per-recipient offline queue limit.
    pub queue_limit: usize,
    /// JSON-lines event log file.
    pub log_file: PathBuf,
    /// Provisioned clients, as declared in the file.
    pub clients: Vec<ClientDescriptor>,
    /// Admin token digest; `None` locks the HTTP API out entirely.
    pub admin_token_hash: Option<KeyDigest>,
}

impl Config {
    /// Load configuration from a JSON file, then apply environment and CLI
    /// overrides (CLI wins over `AMB_SOCKET` / `AMB_ADMIN_TOKEN`, which win
    /// over the file).
    ///
    /// # Errors
    ///
    /// Every validation failure here is fatal at startup: missing or
    /// unreadable file, invalid JSON, empty client list, client without an
    /// id or key hash, duplicate ids, malformed key hash, malformed socket
    /// mode, malformed admin token hash.
    pub fn load(config_path: &Path, cli_socket: Option<&Path>) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            BridgeError::Config(format!(
                "cannot read config {}: {e}",
                config_path.display()
            ))
        })?;
        let file: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            BridgeError::Config(format!(
                "config parse error in {}: {e}",
                config_path.display()
            ))
        })?;
        info!(path = %config_path.display(), "loaded config file");

        validate_clients(&file.clients)?;

        let socket_mode = parse_socket_mode(&file.socket_mode)?;

        let socket_path = cli_socket
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("AMB_SOCKET").map(PathBuf::from))
            .or(file.socket_path)
            .unwrap_or_else(|| runtime_dir().join("amb.sock"));

        let log_file = file
            .log_file
            .unwrap_or_else(|| runtime_dir().join("amb.log"));

        // A plaintext admin token from the environment supersedes the stored
        // hash; with neither present the HTTP API stays locked.
        let admin_token_hash = match std::env::var("AMB_ADMIN_TOKEN") {
            Ok(token) if !token.is_empty() => Some(KeyDigest::of(&token)),
            _ => file
                .admin_token_hash
                .as_deref()
                .map(|h| {
                    KeyDigest::parse_hex(h).map_err(|e| {
                        BridgeError::Config(format!("invalid adminTokenHash: {e}"))
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            socket_path,
            socket_mode,
            http_host: file.http_host,
            http_port: file.http_port,
            max_frame_bytes: file.max_frame_bytes,
            queue_limit: file.queue_limit,
            log_file,
            clients: file.clients,
            admin_token_hash,
        })
    }
}

fn validate_clients(clients: &[ClientDescriptor]) -> BridgeResult<()> {
    if clients.is_empty() {
        return Err(BridgeError::Config(
            "config must define at least one client".into(),
        ));
    }
    let mut seen = HashSet::new();
    for client in clients {
        if client.id.is_empty() {
            return Err(BridgeError::Config("client with empty id".into()));
        }
        if client.key_hash.is_empty() {
            return Err(BridgeError::Config(format!(
                "client {} has no keyHash",
                client.id
            )));
        }
        KeyDigest::parse_hex(&client.key_hash).map_err(|e| {
            BridgeError::Config(format!("client {}: {e}", client.id))
        })?;
        if !seen.insert(client.id.as_str()) {
            return Err(BridgeError::Config(format!(
                "duplicate client id: {}",
                client.id
            )));
        }
    }
    Ok(())
}

fn parse_socket_mode(mode: &str) -> BridgeResult<u32> {
    u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .map_err(|e| BridgeError::Config(format!("invalid socketMode {mode:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("amb.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        (dir, path)
    }

    fn hash_of(secret: &str) -> String {
        KeyDigest::of(secret).to_hex()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (_dir, path) = write_config(&format!(
            r#"{{"clients":[{{"id":"a","keyHash":"{}","canSendTo":["*"]}}]}}"#,
            hash_of("ka")
        ));
        let cfg = Config::load(&path, None).unwrap();
        assert_eq!(cfg.socket_mode, 0o660);
        assert_eq!(cfg.http_host, "127.0.0.1");
        assert_eq!(cfg.max_frame_bytes, 65536);
        assert_eq!(cfg.queue_limit, 500);
        assert!(cfg.admin_token_hash.is_none());
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(Config::load(Path::new("/nonexistent/amb.json"), None).is_err());
    }

    #[test]
    fn invalid_json_is_fatal() {
        let (_dir, path) = write_config("{not json");
        assert!(Config::load(&path, None).is_err());
    }

    #[test]
    fn empty_clients_is_fatal() {
        let (_dir, path) = write_config(r#"{"clients":[]}"#);
        assert!(Config::load(&path, None).is_err());
    }

    #[test]
    fn duplicate_client_id_is_fatal() {
        let h = hash_of("k");
        let (_dir, path) = write_config(&format!(
            r#"{{"clients":[{{"id":"a","keyHash":"{h}"}},{{"id":"a","keyHash":"{h}"}}]}}"#
        ));
        let err = Config::load(&path, None).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn malformed_key_hash_is_fatal() {
        let (_dir, path) =
            write_config(r#"{"clients":[{"id":"a","keyHash":"notahash"}]}"#);
        assert!(Config::load(&path, None).is_err());
    }

    #[test]
    fn malformed_socket_mode_is_fatal() {
        let (_dir, path) = write_config(&format!(
            r#"{{"socketMode":"99z","clients":[{{"id":"a","keyHash":"{}"}}]}}"#,
            hash_of("k")
        ));
        assert!(Config::load(&path, None).is_err());
    }

    #[test]
    fn cli_socket_overrides_file() {
        let (_dir, path) = write_config(&format!(
            r#"{{"socketPath":"/tmp/from-file.sock","clients":[{{"id":"a","keyHash":"{}"}}]}}"#,
            hash_of("k")
        ));
        let cfg = Config::load(&path, Some(Path::new("/tmp/from-cli.sock"))).unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/from-cli.sock"));
    }

    #[test]
    fn admin_token_hash_parses() {
        let (_dir, path) = write_config(&format!(
            r#"{{"adminTokenHash":"{}","clients":[{{"id":"a","keyHash":"{}"}}]}}"#,
            hash_of("admintoken"),
            hash_of("k")
        ));
        let cfg = Config::load(&path, None).unwrap();
        assert!(cfg.admin_token_hash.unwrap().matches("admintoken"));
    }
}
