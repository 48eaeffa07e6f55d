use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::sync::{SyncError, SyncResult};

use super::client::{GoogleClient, Lookup, SPREADSHEET_MIME};
use super::drive_handler::DriveHandler;

/// Row number at the start of an A1 cell reference such as `A5` or `$B$12`.
static A1_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?[A-Za-z]+\$?(\d+)").expect("valid A1 regex"));

/// Picks a worksheet by position or by title. A title takes precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorksheetSelector {
    Index(usize),
    Name(String),
}

impl Default for WorksheetSelector {
    fn default() -> Self {
        WorksheetSelector::Index(0)
    }
}

impl WorksheetSelector {
    pub fn from_parts(index: Option<usize>, name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.is_empty() => WorksheetSelector::Name(name.to_string()),
            _ => WorksheetSelector::Index(index.unwrap_or(0)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Worksheet {
    pub sheet_id: i64,
    pub title: String,
    pub index: usize,
    pub row_count: Option<u64>,
    pub column_count: Option<u64>,
}

impl Worksheet {
    /// The worksheet title quoted for use in an A1 range.
    fn range_prefix(&self) -> String {
        format!("'{}'", self.title.replace('\'', "''"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Spreadsheet {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub worksheets: Vec<Worksheet>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SpreadsheetSummary {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Worksheet contents split into column names and data rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// One JSON object per row, keyed by column name.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().map(Value::String))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub updated_cells: u64,
    pub updated_rows: u64,
    pub updated_range: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppendSummary {
    pub rows_added: u64,
    pub starting_row: Option<u64>,
    pub updated_range: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResponse {
    spreadsheet_id: String,
    spreadsheet_url: Option<String>,
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    index: usize,
    grid_properties: Option<GridProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    row_count: Option<u64>,
    column_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    updated_range: String,
    #[serde(default)]
    updated_rows: u64,
    #[serde(default)]
    updated_cells: u64,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    #[serde(default)]
    updates: UpdateResponse,
}

/// Spreadsheet reads and writes through the Sheets v4 API.
#[derive(Clone)]
pub struct SheetHandler {
    client: Arc<GoogleClient>,
}

impl SheetHandler {
    pub fn new(client: Arc<GoogleClient>) -> Self {
        Self { client }
    }

    pub async fn get_spreadsheet(&self, spreadsheet_key: &str) -> SyncResult<Spreadsheet> {
        let mut url = self
            .client
            .sheets_endpoint(&["v4", "spreadsheets", spreadsheet_key])?;
        url.query_pairs_mut().append_pair(
            "fields",
            "spreadsheetId,spreadsheetUrl,properties.title,\
             sheets.properties(sheetId,title,index,gridProperties(rowCount,columnCount))",
        );
        let resp: SpreadsheetResponse = self
            .client
            .get_json(&url, Lookup::Sheet, spreadsheet_key)
            .await?;

        let mut worksheets: Vec<Worksheet> = resp
            .sheets
            .into_iter()
            .map(|s| Worksheet {
                sheet_id: s.properties.sheet_id,
                title: s.properties.title,
                index: s.properties.index,
                row_count: s.properties.grid_properties.as_ref().and_then(|g| g.row_count),
                column_count: s
                    .properties
                    .grid_properties
                    .as_ref()
                    .and_then(|g| g.column_count),
            })
            .collect();
        worksheets.sort_by_key(|w| w.index);

        Ok(Spreadsheet {
            id: resp.spreadsheet_id,
            title: resp.properties.title,
            url: resp.spreadsheet_url,
            worksheets,
        })
    }

    pub async fn get_worksheet(
        &self,
        spreadsheet_key: &str,
        selector: &WorksheetSelector,
    ) -> SyncResult<Worksheet> {
        let spreadsheet = self.get_spreadsheet(spreadsheet_key).await?;
        let found = match selector {
            WorksheetSelector::Name(name) => {
                spreadsheet.worksheets.into_iter().find(|w| &w.title == name)
            }
            WorksheetSelector::Index(index) => spreadsheet.worksheets.into_iter().nth(*index),
        };
        found.ok_or_else(|| {
            SyncError::SheetNotFound(format!("{spreadsheet_key}: no worksheet {selector:?}"))
        })
    }

    /// Every populated cell of the worksheet as strings, rows padded to equal
    /// width.
    pub async fn get_all_values(
        &self,
        spreadsheet_key: &str,
        selector: &WorksheetSelector,
    ) -> SyncResult<Vec<Vec<String>>> {
        let worksheet = self.get_worksheet(spreadsheet_key, selector).await?;
        let range = worksheet.range_prefix();
        let url = self.client.sheets_endpoint(&[
            "v4",
            "spreadsheets",
            spreadsheet_key,
            "values",
            &range,
        ])?;
        let values: ValueRange = self
            .client
            .get_json(&url, Lookup::Sheet, spreadsheet_key)
            .await?;

        let mut rows: Vec<Vec<String>> = values
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }

        debug!(
            spreadsheet = %spreadsheet_key,
            worksheet = %worksheet.title,
            rows = rows.len(),
            "Fetched worksheet values"
        );
        Ok(rows)
    }

    /// Worksheet contents as a table. With `has_header` the first row names
    /// the columns and must not repeat a name; otherwise columns are numbered.
    pub async fn get_as_table(
        &self,
        spreadsheet_key: &str,
        selector: &WorksheetSelector,
        has_header: bool,
    ) -> SyncResult<SheetTable> {
        let values = self.get_all_values(spreadsheet_key, selector).await?;
        to_table(values, has_header)
    }

    /// Writes `values` into `range` (A1 notation, relative to the named or
    /// first worksheet unless the range already names a sheet).
    pub async fn update_values(
        &self,
        spreadsheet_key: &str,
        values: &[Vec<Value>],
        range: &str,
        worksheet_name: Option<&str>,
    ) -> SyncResult<UpdateSummary> {
        let full_range = if range.contains('!') {
            range.to_string()
        } else {
            let selector = WorksheetSelector::from_parts(None, worksheet_name);
            let worksheet = self.get_worksheet(spreadsheet_key, &selector).await?;
            format!("{}!{}", worksheet.range_prefix(), range)
        };

        let mut url = self.client.sheets_endpoint(&[
            "v4",
            "spreadsheets",
            spreadsheet_key,
            "values",
            &full_range,
        ])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "range": full_range, "majorDimension": "ROWS", "values": values });

        let resp: UpdateResponse = self
            .client
            .send_json(|c| c.put(url), &body, Lookup::Sheet, spreadsheet_key)
            .await?;
        info!(
            spreadsheet = %spreadsheet_key,
            range = %resp.updated_range,
            cells = resp.updated_cells,
            "Updated spreadsheet values"
        );

        Ok(UpdateSummary {
            updated_cells: resp.updated_cells,
            updated_rows: resp.updated_rows,
            updated_range: resp.updated_range,
        })
    }

    /// Appends rows after the last populated row using the API's own append
    /// operation, so concurrent appends never overwrite each other.
    pub async fn append_values(
        &self,
        spreadsheet_key: &str,
        values: &[Vec<Value>],
        worksheet_name: Option<&str>,
    ) -> SyncResult<AppendSummary> {
        let selector = WorksheetSelector::from_parts(None, worksheet_name);
        let worksheet = self.get_worksheet(spreadsheet_key, &selector).await?;
        let target = format!("{}:append", worksheet.range_prefix());

        let mut url = self.client.sheets_endpoint(&[
            "v4",
            "spreadsheets",
            spreadsheet_key,
            "values",
            &target,
        ])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "majorDimension": "ROWS", "values": values });

        let resp: AppendResponse = self
            .client
            .send_json(|c| c.post(url), &body, Lookup::Sheet, spreadsheet_key)
            .await?;
        let updates = resp.updates;
        info!(
            spreadsheet = %spreadsheet_key,
            range = %updates.updated_range,
            rows = updates.updated_rows,
            "Appended spreadsheet rows"
        );

        Ok(AppendSummary {
            rows_added: updates.updated_rows,
            starting_row: starting_row(&updates.updated_range),
            updated_range: updates.updated_range,
        })
    }

    /// Spreadsheets visible to the service account.
    pub async fn available_spreadsheets(
        &self,
        drive: &DriveHandler,
    ) -> SyncResult<Vec<SpreadsheetSummary>> {
        let files = drive.search_files_by_type(SPREADSHEET_MIME).await?;
        Ok(files
            .into_iter()
            .map(|f| SpreadsheetSummary {
                url: format!("https://docs.google.com/spreadsheets/d/{}", f.id),
                id: f.id,
                title: f.name,
            })
            .collect())
    }
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_table(mut values: Vec<Vec<String>>, has_header: bool) -> SyncResult<SheetTable> {
    if values.is_empty() {
        return Ok(SheetTable::default());
    }
    let width = values[0].len();

    if !has_header {
        return Ok(SheetTable {
            headers: (0..width).map(|i| i.to_string()).collect(),
            rows: values,
        });
    }

    let mut headers = values.remove(0);
    // Padding from longer data rows is not part of the header.
    while headers.last().is_some_and(|h| h.is_empty()) {
        headers.pop();
    }
    let width = headers.len();
    let mut seen = HashSet::new();
    for (column, header) in headers.iter().enumerate() {
        if header.trim().is_empty() {
            return Err(SyncError::DataFormat(format!(
                "header row has an empty name in column {column}"
            )));
        }
        if !seen.insert(header.as_str()) {
            return Err(SyncError::DataFormat(format!(
                "header row repeats column {header:?}"
            )));
        }
    }
    for row in &mut values {
        row.resize(width, String::new());
    }
    Ok(SheetTable {
        headers,
        rows: values,
    })
}

fn starting_row(updated_range: &str) -> Option<u64> {
    let cells = updated_range.rsplit('!').next()?;
    A1_ROW
        .captures(cells)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
