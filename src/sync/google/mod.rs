//! Google Sheets v4 and Drive v3 access with a service account.

pub mod client;
pub mod credentials;
pub mod drive_handler;
pub mod sheet_handler;

pub use client::{GoogleClient, GoogleConnection};
pub use credentials::{ServiceAccountAuth, ServiceAccountKey};
pub use drive_handler::{DriveFile, DriveHandler};
pub use sheet_handler::{
    AppendSummary, SheetHandler, SheetTable, Spreadsheet, SpreadsheetSummary, UpdateSummary,
    Worksheet, WorksheetSelector,
};
