//! Parses the blockchain node's own `evrmore.conf`. Unlike the marketplace
//! settings file this one is owned by the node; we only read it to discover
//! `rpcuser`/`rpcpassword`/`rpcport`/`rpcbind` and the ZMQ publisher
//! endpoints it was started with.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeConfError {
    #[error("could not locate evrmore.conf under {0}")]
    NotFound(PathBuf),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("evrmore.conf at {0} is missing required key '{1}'")]
    MissingKey(PathBuf, &'static str),
}

#[derive(Debug, Clone)]
pub struct NodeConf {
    pub rpc_user: String,
    pub rpc_password: String,
    pub rpc_port: u16,
    pub rpc_bind: String,
    pub zmq_pub_hashtx: Option<String>,
    pub zmq_pub_hashblock: Option<String>,
    pub zmq_pub_sequence: Option<String>,
}

impl NodeConf {
    /// `root` may be the conf file itself or a directory containing
    /// `evrmore.conf`, matching how `load_evrmore_conf.py` resolved its
    /// input path.
    pub fn load(root: &Path) -> Result<Self, NodeConfError> {
        let path = if root.is_dir() {
            root.join("evrmore.conf")
        } else {
            root.to_path_buf()
        };
        if !path.is_file() {
            return Err(NodeConfError::NotFound(path));
        }

        let ini = Ini::load_from_file(&path).map_err(|source| NodeConfError::Parse {
            path: path.clone(),
            source,
        })?;
        let general = ini.general_section();

        let get = |key: &'static str| -> Option<String> {
            general.get(key).map(str::to_owned)
        };
        let require = |key: &'static str| -> Result<String, NodeConfError> {
            get(key).ok_or_else(|| NodeConfError::MissingKey(path.clone(), key))
        };

        Ok(Self {
            rpc_user: require("rpcuser")?,
            rpc_password: require("rpcpassword")?,
            rpc_port: get("rpcport")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8819),
            rpc_bind: get("rpcbind").unwrap_or_else(|| "127.0.0.1".to_string()),
            zmq_pub_hashtx: get("zmqpubhashtx"),
            zmq_pub_hashblock: get("zmqpubhashblock"),
            zmq_pub_sequence: get("zmqpubsequence"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_flat_key_value_conf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rpcuser=marketplace\nrpcpassword=secret\nrpcport=8819\nzmqpubhashtx=tcp://127.0.0.1:28332\n"
        )
        .unwrap();

        let conf = NodeConf::load(file.path()).unwrap();
        assert_eq!(conf.rpc_user, "marketplace");
        assert_eq!(conf.rpc_password, "secret");
        assert_eq!(conf.rpc_port, 8819);
        assert_eq!(conf.zmq_pub_hashtx.as_deref(), Some("tcp://127.0.0.1:28332"));
        assert_eq!(conf.zmq_pub_hashblock, None);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = NodeConf::load(Path::new("/nonexistent/evrmore.conf")).unwrap_err();
        assert!(matches!(err, NodeConfError::NotFound(_)));
    }
}
