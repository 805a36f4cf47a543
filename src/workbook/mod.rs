//! Product workbook input and trial export.
//!
//! Workbooks are JSON documents of named product groups, each row keyed by
//! column header:
//!
//! ```json
//! {"groups": [{"name": "Oncology", "products": [
//!     {"TC Scrape Number": 101, "Product Name": "Drug A", "Original Phase": "Phase 2"}
//! ]}]}
//! ```
//!
//! Each group becomes one [`ExportSheet`] in the export file, with product
//! ids under the group's id column header.

mod export;
mod input;

pub use export::{
    build_sheet, export_file_name, write_export, ExportError, ExportOptions, ExportRow,
    ExportSheet, NOT_AVAILABLE,
};
pub use input::{
    find_id_column, load_workbook, parse_workbook, InputError, InputOptions, InvalidGroup,
    ProductGroup, Workbook, ID_COLUMN_CANDIDATES,
};
