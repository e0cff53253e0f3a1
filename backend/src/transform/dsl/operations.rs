//! Reference card for the transformation language, printed by `rebate operations`.

/// Get a description of every available operation
pub fn operations_description() -> String {
    r#"Cell operations (`properties`, `criteria`, `with`, `to`):

| Operation | Description | Parameters |
|-----------|-------------|------------|
| column | Read a cell of the current row | index: number or letters ("A", "AB") |
| literal | Constant value | value: string, number or boolean |
| counter | Next value of the run-wide counter | - |
| concat | with + separator + value | with: cell chain, separator (default "") |
| multiply | Decimal product | with: cell chain |
| divide | Decimal quotient, division by zero skips the row | with: cell chain |
| equals | "true" when the with chain equals the value | with: cell chain |
| coerce | Date, number or dollar conversion | as: date / number / usd (see below) |
| replace | First-occurrence replacement | find | substring | all, put |
| trim | Remove leading/trailing whitespace | - |
| character | Keep or drop listed characters | select, action: keep / drop |
| meta | Facts about the run or row | value: quarter.lastday / quarter.number / row.source |
| reference | Lookup in tables/<table>.csv, asks when missing | table, match, take, group |

Coercions:

| as | Parameters |
|----|------------|
| date | parse: comma-separated patterns, format (default "M/D/YYYY"), year: assume |
| number | otherwise: fallback value when the text is not a number |
| usd | round: up / down / default |

Row operations (`sources[].rows`, row numbers start at 1):

| Operation | Description | Parameters |
|-----------|-------------|------------|
| filter | Keep rows whose criteria yields "true" | criteria: cell chain |
| select | Keep or drop rows by a column value | column, is | isnt, action |
| chop | Cut at the first matching row | column, is, keep: top / bottom, otherwise: drop / take |
| trim | Cut rows from either end | top: first row kept, bottom: rows cut |

Table operations (`preprocess`, `postprocess`):

| Operation | Description | Parameters |
|-----------|-------------|------------|
| filter, select, chop | As for rows | - |
| trim | Remove rows from either end | top, bottom: counts |
| debug | Write the table to debug/<name>/<uuid>.csv | name (default "DEBUG") |
| header | Keep or drop columns by header name | names, action |
| percolate | Fill matching cells from the row above | columns, matches (default [""]) |
| coalesce | Merge rows sharing columns, summing others | match, combine |
| set | Overwrite a column per row | column, to: cell chain |

Example transformer:
"#
    .to_string()
        + EXAMPLE_TRANSFORMER
}

/// A transformer exercising the common operations.
pub const EXAMPLE_TRANSFORMER: &str = r#"{
  "sources": [
    {
      "type": "excel",
      "group": "acme",
      "subgroup": "east",
      "rows": [{ "type": "trim", "top": 2 }]
    }
  ],
  "preprocess": [{ "type": "percolate", "columns": ["A"] }],
  "properties": [
    {
      "name": "memberId",
      "definition": [
        { "type": "column", "index": "A" },
        { "type": "trim" },
        { "type": "reference", "table": "members", "match": "name", "take": "id", "group": "acme" }
      ]
    },
    {
      "name": "rebateAmount",
      "definition": [
        { "type": "column", "index": "C" },
        { "type": "multiply", "with": [{ "type": "literal", "value": 0.02 }] },
        { "type": "coerce", "as": "usd" }
      ]
    },
    { "name": "quarter", "definition": [{ "type": "meta", "value": "quarter.number" }] }
  ],
  "postprocess": [{ "type": "coalesce", "match": [0], "combine": [1] }],
  "destination": { "type": "csv", "group": "rebates", "subgroup": "acme" }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformerConfig;

    #[test]
    fn test_example_is_a_valid_transformer() {
        let config = TransformerConfig::from_json("example", EXAMPLE_TRANSFORMER).unwrap();
        assert_eq!(config.header(), vec!["memberId", "rebateAmount", "quarter"]);
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_description_mentions_every_family() {
        let text = operations_description();
        for operation in ["| reference |", "| coalesce |", "| chop |", "| usd |"] {
            assert!(text.contains(operation), "missing {}", operation);
        }
        assert!(text.ends_with(EXAMPLE_TRANSFORMER));
    }
}
