pub mod client;
pub mod file_handler;

pub use client::{ConnectionState, DownloadedFile, DropboxAccount, DropboxClient, GrantedTokens};
pub use file_handler::FileHandler;
