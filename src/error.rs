use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Erreurs possibles entre le fichier de connexion et la valeur d'un registre
#[derive(Error, Debug)]
pub enum HwError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot read {}: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },

    #[error("malformed XML in {}: {source}", .path.display())]
    Xml {
        path: PathBuf,
        source: roxmltree::Error,
    },

    #[error("{}: {msg}", .path.display())]
    Description { path: PathBuf, msg: String },

    #[error("unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("IPbus protocol error: {0}")]
    Protocol(String),

    #[error("no hardware loaded")]
    NoHardware,
}

pub type Result<T> = std::result::Result<T, HwError>;

impl HwError {
    pub fn description<P: Into<PathBuf>, S: Into<String>>(path: P, msg: S) -> Self {
        HwError::Description {
            path: path.into(),
            msg: msg.into(),
        }
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        HwError::Protocol(msg.into())
    }
}
