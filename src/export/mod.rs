//! CSV/ZIP serialization of fetched rows.
//!
//! Rows are written with standard CSV quoting: a field containing a comma, a
//! quote or a line break is quoted, everything else is written bare. Every row
//! ends with `\n` except the final row of each produced CSV buffer.

use std::io::{Cursor, Write};

use serde::Serialize;
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::job::OutputMode;
use crate::error::Result;
use crate::fetch::{Row, RowAccumulator};

pub mod sink;

pub use sink::{ArtifactSink, DirectorySink};

pub const CSV_MIME: &str = "text/csv;charset=utf-8";
pub const ZIP_MIME: &str = "application/zip";

/// A produced export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub mime: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Render the accumulator in the given layout. Pure: same input, same bytes.
pub fn serialize(rows: &RowAccumulator, output_mode: OutputMode) -> Result<Artifact> {
    let artifact = match output_mode {
        OutputMode::SingleFile => Artifact {
            filename: "export.csv".to_string(),
            mime: CSV_MIME.to_string(),
            bytes: render_csv(rows.iter().flat_map(|(_, rows)| rows.iter()))?,
        },
        OutputMode::PerEntityZip => {
            let members = rows
                .iter()
                .map(|(entity, rows)| Ok((entity.to_string(), render_csv(rows.iter())?)))
                .collect::<Result<Vec<_>>>()?;
            zip_artifact(members)?
        }
        OutputMode::PerAggregationZip => {
            let members = merge_by_aggregation(rows)
                .into_iter()
                .map(|(name, rows)| Ok((name, render_csv(rows.into_iter())?)))
                .collect::<Result<Vec<_>>>()?;
            zip_artifact(members)?
        }
    };

    tracing::debug!(
        filename = %artifact.filename,
        bytes = artifact.bytes.len(),
        output_mode = ?output_mode,
        "Serialized export"
    );
    Ok(artifact)
}

/// Render rows as CSV, omitting the newline after the last row.
pub fn render_csv<'a>(rows: impl Iterator<Item = &'a Row>) -> Result<Vec<u8>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .flexible(true)
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Necessary);
    let mut writer = builder.from_writer(Vec::new());

    for row in rows {
        // The csv crate quotes a lone empty field; an empty cell stays an empty line.
        if let [only] = row.as_slice()
            && render_value(only).is_empty()
        {
            let mut bytes = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e.error()))?;
            bytes.push(b'\n');
            writer = builder.from_writer(bytes);
            continue;
        }
        writer.write_record(row.iter().map(render_value))?;
    }

    let mut bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e.error()))?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    Ok(bytes)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

/// Rows of all sources of one aggregation, concatenated in commit order.
/// Raw data entities keep their own name.
fn merge_by_aggregation(rows: &RowAccumulator) -> Vec<(String, Vec<&Row>)> {
    let mut merged: Vec<(String, Vec<&Row>)> = Vec::new();
    for (entity, entity_rows) in rows.iter() {
        let name = entity
            .aggregation_id()
            .map(str::to_string)
            .unwrap_or_else(|| entity.to_string());
        match merged.iter_mut().find(|(n, _)| *n == name) {
            Some((_, acc)) => acc.extend(entity_rows.iter()),
            None => merged.push((name, entity_rows.iter().collect())),
        }
    }
    merged
}

fn zip_artifact(members: Vec<(String, Vec<u8>)>) -> Result<Artifact> {
    // Fixed timestamp so the archive bytes only depend on the content.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in members {
        zip.start_file(format!("{name}.csv"), options)?;
        zip.write_all(&body)?;
    }
    let bytes = zip.finish()?.into_inner();

    Ok(Artifact {
        filename: "export.zip".to_string(),
        mime: ZIP_MIME.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::EntityKey;
    use serde_json::json;
    use std::io::Read;

    fn accumulator() -> RowAccumulator {
        let mut acc = RowAccumulator::default();
        acc.commit(
            EntityKey::Aggregation {
                aggregation_id: "agg1".into(),
                source_id: "s1".into(),
            },
            vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]],
        );
        acc.commit(
            EntityKey::Aggregation {
                aggregation_id: "agg2".into(),
                source_id: "s1".into(),
            },
            vec![],
        );
        acc.commit(
            EntityKey::Aggregation {
                aggregation_id: "agg1".into(),
                source_id: "s2".into(),
            },
            vec![vec![json!("c"), Value::Null]],
        );
        acc
    }

    fn unzip(bytes: &[u8]) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut body = String::new();
                file.read_to_string(&mut body).unwrap();
                (file.name().to_string(), body)
            })
            .collect()
    }

    #[test]
    fn test_single_file_concatenates_without_final_newline() {
        let artifact = serialize(&accumulator(), OutputMode::SingleFile).unwrap();
        assert_eq!(artifact.filename, "export.csv");
        assert_eq!(artifact.mime, CSV_MIME);
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "a,1\nb,2\nc,");
    }

    #[test]
    fn test_per_entity_zip_has_member_per_entity() {
        let artifact = serialize(&accumulator(), OutputMode::PerEntityZip).unwrap();
        assert_eq!(artifact.filename, "export.zip");
        assert_eq!(
            unzip(&artifact.bytes),
            vec![
                ("agg1_s1.csv".to_string(), "a,1\nb,2".to_string()),
                ("agg2_s1.csv".to_string(), String::new()),
                ("agg1_s2.csv".to_string(), "c,".to_string()),
            ]
        );
    }

    #[test]
    fn test_per_aggregation_zip_merges_sources() {
        let artifact = serialize(&accumulator(), OutputMode::PerAggregationZip).unwrap();
        assert_eq!(
            unzip(&artifact.bytes),
            vec![
                ("agg1.csv".to_string(), "a,1\nb,2\nc,".to_string()),
                ("agg2.csv".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_serialization_is_deterministic() {
        for mode in [
            OutputMode::SingleFile,
            OutputMode::PerEntityZip,
            OutputMode::PerAggregationZip,
        ] {
            let first = serialize(&accumulator(), mode).unwrap();
            let second = serialize(&accumulator(), mode).unwrap();
            assert_eq!(first.bytes, second.bytes);
        }
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        let rows = [vec![json!("Room 1, north"), json!("say \"hi\""), json!(21.5)]];
        let bytes = render_csv(rows.iter()).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "\"Room 1, north\",\"say \"\"hi\"\"\",21.5"
        );
    }

    #[test]
    fn test_single_empty_cell_is_an_empty_line() {
        let rows = [vec![Value::Null], vec![json!(1)], vec![json!("")]];
        let bytes = render_csv(rows.iter()).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "\n1\n");
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(1609459200)), "1609459200");
        assert_eq!(render_value(&json!("2021-01-01T00:00:00.000Z")), "2021-01-01T00:00:00.000Z");
    }
}
