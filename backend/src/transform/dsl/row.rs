//! Row transformations.
//!
//! The row family works on a sheet as soon as it is read, using spreadsheet
//! row numbering: `trim { top: 3 }` keeps rows from row 3 onward.

use serde::{Deserialize, Serialize};

use super::cell::{Action, CellTransformation};
use super::table::{Keep, Otherwise, Values};
use crate::models::ColumnIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RowTransformation {
    Filter { criteria: Vec<CellTransformation> },

    Select {
        column: ColumnIndex,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is: Option<Values>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        isnt: Option<Values>,
        #[serde(default)]
        action: Action,
    },

    Chop {
        column: ColumnIndex,
        is: Values,
        #[serde(default)]
        keep: Keep,
        #[serde(default)]
        otherwise: Otherwise,
    },

    /// `top` is the first row number kept; `bottom` rows are cut from the end.
    Trim {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bottom: Option<usize>,
    },
}

impl RowTransformation {
    pub fn name(&self) -> &'static str {
        match self {
            RowTransformation::Filter { .. } => "filter",
            RowTransformation::Select { .. } => "select",
            RowTransformation::Chop { .. } => "chop",
            RowTransformation::Trim { .. } => "trim",
        }
    }

    /// Rows to skip at the top for a 1-indexed `top`.
    pub fn leading_rows(top: Option<usize>) -> usize {
        top.map(|t| t.saturating_sub(1)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leading_rows_is_one_based() {
        assert_eq!(RowTransformation::leading_rows(None), 0);
        assert_eq!(RowTransformation::leading_rows(Some(0)), 0);
        assert_eq!(RowTransformation::leading_rows(Some(1)), 0);
        assert_eq!(RowTransformation::leading_rows(Some(3)), 2);
    }

    #[test]
    fn test_parse_rejects_table_only_operations() {
        assert!(serde_json::from_value::<RowTransformation>(json!({"type": "trim", "top": 2})).is_ok());
        assert!(serde_json::from_value::<RowTransformation>(json!({"type": "debug"})).is_err());
    }
}
