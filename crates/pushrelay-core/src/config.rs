use clap::Parser;

use crate::{providers::fcm_client::FCM_DEFAULT_URL, storage::FIRESTORE_DEFAULT_URL};

#[derive(Parser, Debug, Clone)]
#[command(name = "pushrelay", version, about = "FCM notification relay and token broker")]
pub struct CoreArgs {
    /// HTTP bind address.
    #[arg(
        env = "PUSHRELAY_HTTP_ADDR",
        short = 'a',
        default_value = "127.0.0.1:8080"
    )]
    pub http_addr: String,

    /// Optional Token for API authentication.
    #[arg(env = "PUSHRELAY_TOKEN", short = 't', hide_env_values = true)]
    pub token: Option<String>,

    /// Max in-flight requests; queue capacity matches this value.
    /// Set to 0 to disable request limiting.
    #[arg(env = "MAX_CONCURRENT", short = 'c', default_value = "200")]
    pub max_concurrent: usize,

    /// Data directory for the local user store.
    #[arg(env = "DATA_PATH", short = 'd', default_value = "./data")]
    pub data_path: String,

    /// User directory: `firestore` (default), `firestore://<project>` or `redb`.
    #[arg(env = "PUSHRELAY_STORE_URL", long = "store-url")]
    pub store_url: Option<String>,

    /// Firestore REST base URL.
    #[arg(env = "FIRESTORE_URL", long = "firestore-url", default_value = FIRESTORE_DEFAULT_URL)]
    pub firestore_url: String,

    /// FCM HTTP v1 base URL.
    #[arg(env = "FCM_URL", long = "fcm-url", default_value = FCM_DEFAULT_URL)]
    pub fcm_url: String,
}

impl CoreArgs {
    /// Whether the embedded store is selected and needs `data_path`.
    pub fn uses_local_store(&self) -> bool {
        self.store_url.as_deref().map(str::trim).is_some_and(|url| {
            let scheme = url.split_once("://").map_or(url, |(scheme, _)| scheme);
            scheme.eq_ignore_ascii_case("redb")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_read_firestore() {
        let args = CoreArgs::try_parse_from(["pushrelay"]).expect("defaults parse");
        assert_eq!(args.http_addr, "127.0.0.1:8080");
        assert_eq!(args.max_concurrent, 200);
        assert_eq!(args.store_url, None);
        assert!(!args.uses_local_store());
    }

    #[test]
    fn only_redb_needs_data_dir() {
        let args = CoreArgs::try_parse_from(["pushrelay", "--store-url", "firestore://my-app"])
            .expect("args parse");
        assert!(!args.uses_local_store());

        let args =
            CoreArgs::try_parse_from(["pushrelay", "--store-url", "redb"]).expect("args parse");
        assert!(args.uses_local_store());
    }
}
