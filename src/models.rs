pub mod enums;
pub mod structs;

pub use enums::{ColumnType, SortDirection};
pub use structs::{ColumnDef, Record, TableResult, TableSchema};
