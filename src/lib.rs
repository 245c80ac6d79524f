/*!
# Sheet Browser

Upload a spreadsheet and browse it in the browser: sort by any column, filter by a
case-insensitive substring, and page through the result.

## Overview

The crate ships two front doors over one query engine:

- **portal** (`src/web.rs`): a server-rendered page behind Google sign-in. One
  dataset is held in memory for everybody; uploading replaces it and clearing
  empties it. The uploaded file is also kept on disk as `data.<ext>` so a restart
  picks it back up.
- **api-server** (`src/bin/api.rs`): JSON endpoints for a separate single-page
  frontend. Uploads are stored on disk under their original name and re-read on
  every request. Unknown paths are served from the built frontend.

## Architecture

### Data
- **value**: one spreadsheet cell (`CellValue`) with its ordering and display rules
- **dataset**: headers, inferred column kinds and rows
- **loader**: calamine / csv readers that turn a file into a `Dataset`
- **query**: filter, sort and paginate a `Dataset`

### Storage
- **store**: the portal's shared in-memory dataset, swapped as a whole
- **ingest**: upload-name validation and parsing
- **uploads**: the API's single-file upload directory

### Web (feature `web`)
- **config**: clap flags and environment variables
- **auth**: OAuth2 sign-in, session table and the session gate middleware
- **http**: request logging and multipart helpers
- **app**: portal routes and HTML rendering (handlebars)
- **api**: JSON routes

## Portal routes

- `GET /` - Current page of the dataset (`page`, `sort_by`, `sort_order`,
  `filter_column`, `filter_query`)
- `POST /upload` - Replace the dataset
- `POST /clear` - Drop the dataset
- `GET /login`, `GET /login/authorized`, `GET /logout` - Sign-in flow

## API routes

- `POST /upload` - Store a file (`{message, filename}`)
- `GET /data` - `filename`, `page`, `sortColumn`, `sortDirection`
- `GET /filter` - `filename`, `column`, `query`, `page`
- `POST /clear` - `{filename}`
*/

pub mod dataset;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod query;
pub mod store;
pub mod uploads;
pub mod value;

#[cfg(feature = "web")]
pub mod api;
#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod auth;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod http;

pub use dataset::{ColumnKind, Dataset};
pub use error::SheetError;
pub use query::{PageQuery, PageResult, SortDirection, query};
pub use store::DatasetStore;
pub use value::CellValue;
