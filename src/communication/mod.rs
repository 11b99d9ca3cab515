//! HTTP communication with the master node and the storage nodes

pub mod delete;
pub mod download;
pub mod http;
pub mod master;
pub mod search;
pub mod upload;

pub use delete::Deleter;
pub use download::{DownloadMode, DownloadOutcome, Downloader};
pub use http::HttpClients;
pub use master::MasterNode;
pub use search::{SearchHandle, Searcher};
pub use upload::{UploadEntry, Uploader};
