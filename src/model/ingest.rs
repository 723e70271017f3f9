//! Raw data ingestion
//!
//! Everything enters a model as a static table with a generic class on top.
//! Text is parsed by extension; files are read through an injected
//! [`FileReader`] and typed through an injected [`MimeLookup`].

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};

use super::NetworkModel;
use crate::class::{ClassHandle, ClassKind};
use crate::error::{OrigraphError, OrigraphResult};
use crate::table::TableSpec;

/// Already parsed data. Arrays become a static table indexed by position,
/// objects a static dict table indexed by key.
#[derive(Debug, Clone)]
pub struct StaticTableOptions {
    pub name: String,
    pub data: Value,
    /// Attributes to report even before any row is seen
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StringTableOptions {
    pub name: String,
    /// `json`, `csv`, `tsv`, `treejson` or `topojson`
    pub extension: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileTableOptions {
    pub path: PathBuf,
    /// Falls back to the charset of the file's content type, then UTF-8
    pub encoding: Option<String>,
    pub extension_override: Option<String>,
    pub skip_size_check: bool,
}

/// Reads file contents for ingestion
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn file_size(&self, path: &Path) -> OrigraphResult<u64>;

    async fn read_text(&self, path: &Path, encoding: &str) -> OrigraphResult<String>;
}

/// Resolves content types, extensions and charsets
pub trait MimeLookup: Send + Sync {
    fn content_type(&self, path: &Path) -> Option<String>;

    fn extension(&self, content_type: &str) -> Option<String>;

    fn charset(&self, content_type: &str) -> Option<String>;
}

/// [`FileReader`] over the local filesystem. Only UTF-8 is decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileReader;

#[async_trait]
impl FileReader for TokioFileReader {
    async fn file_size(&self, path: &Path) -> OrigraphResult<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn read_text(&self, path: &Path, encoding: &str) -> OrigraphResult<String> {
        let normalized = encoding.to_ascii_lowercase().replace('-', "");
        if normalized != "utf8" {
            return Err(OrigraphError::InvalidOption(format!(
                "Unsupported encoding: {}",
                encoding
            )));
        }
        let bytes = tokio::fs::read(path).await?;
        String::from_utf8(bytes).map_err(|e| OrigraphError::Parse(e.to_string()))
    }
}

const MIME_TYPES: &[(&str, &str)] = &[
    ("json", "application/json"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("topojson", "application/topo+json"),
    ("treejson", "application/x-treejson"),
];

/// [`MimeLookup`] keyed on file extensions of the supported formats
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionMimeLookup;

impl MimeLookup for ExtensionMimeLookup {
    fn content_type(&self, path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        MIME_TYPES
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, mime)| mime.to_string())
    }

    fn extension(&self, content_type: &str) -> Option<String> {
        MIME_TYPES
            .iter()
            .find(|(_, mime)| *mime == content_type)
            .map(|(ext, _)| ext.to_string())
    }

    fn charset(&self, content_type: &str) -> Option<String> {
        MIME_TYPES
            .iter()
            .any(|(_, mime)| *mime == content_type)
            .then(|| "UTF-8".to_string())
    }
}

/// Record reader for delimiter-separated text with quoted fields
struct DelimitedReader<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    delimiter: char,
    done: bool,
}

impl<'a> DelimitedReader<'a> {
    fn new(text: &'a str, delimiter: char) -> Self {
        Self {
            chars: text.chars().peekable(),
            delimiter,
            done: false,
        }
    }
}

impl Iterator for DelimitedReader<'_> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut record = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        while let Some(c) = self.chars.next() {
            match c {
                '"' if in_quotes => {
                    if self.chars.peek() == Some(&'"') {
                        field.push('"');
                        self.chars.next();
                    } else {
                        in_quotes = false;
                    }
                }
                '"' if field.is_empty() => in_quotes = true,
                '\n' if !in_quotes => {
                    record.push(std::mem::take(&mut field));
                    return Some(record);
                }
                '\r' if !in_quotes => {}
                c if c == self.delimiter && !in_quotes => {
                    record.push(std::mem::take(&mut field));
                }
                c => field.push(c),
            }
        }
        self.done = true;
        if field.is_empty() && record.is_empty() {
            None
        } else {
            record.push(field);
            Some(record)
        }
    }
}

/// Numbers and booleans become typed values; anything else stays text
fn auto_type(field: String) -> Value {
    let trimmed = field.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "" => return Value::String(field),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    match trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(field),
    }
}

fn parse_delimited(text: &str, delimiter: char) -> OrigraphResult<Value> {
    let mut records = DelimitedReader::new(text, delimiter);
    let header = records
        .next()
        .ok_or_else(|| OrigraphError::Parse("missing header row".to_string()))?;
    let rows = records
        .filter(|record| !(record.len() == 1 && record[0].is_empty()))
        .map(|record| {
            let mut row = Map::new();
            let mut fields = record.into_iter();
            for column in &header {
                let value = fields.next().map_or(Value::Null, auto_type);
                row.insert(column.clone(), value);
            }
            Value::Object(row)
        })
        .collect();
    Ok(Value::Array(rows))
}

/// Depth-first flattening of a `children` tree into rows with `id` and
/// `parent` positions
fn flatten_tree(root: Value) -> Value {
    let mut rows = Vec::new();
    let mut pending: Vec<(Value, Option<usize>)> = match root {
        Value::Array(roots) => roots.into_iter().rev().map(|node| (node, None)).collect(),
        node => vec![(node, None)],
    };
    while let Some((node, parent)) = pending.pop() {
        let id = rows.len();
        let mut row = match node {
            Value::Object(row) => row,
            other => {
                let mut row = Map::new();
                row.insert("value".to_string(), other);
                row
            }
        };
        if let Some(Value::Array(children)) = row.remove("children") {
            pending.extend(children.into_iter().rev().map(|child| (child, Some(id))));
        }
        row.insert("id".to_string(), Value::from(id));
        row.insert("parent".to_string(), parent.map_or(Value::Null, Value::from));
        rows.push(Value::Object(row));
    }
    Value::Array(rows)
}

/// One row per geometry: its properties, its `id` and the owning object
fn topojson_rows(topology: Value) -> OrigraphResult<Value> {
    let objects = topology
        .get("objects")
        .and_then(Value::as_object)
        .ok_or_else(|| OrigraphError::Parse("topojson has no objects".to_string()))?;
    let mut rows = Vec::new();
    for (name, object) in objects {
        let geometries = match object.get("geometries").and_then(Value::as_array) {
            Some(geometries) => geometries.iter().collect(),
            None => vec![object],
        };
        for geometry in geometries {
            let mut row = geometry
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(id) = geometry.get("id") {
                row.insert("id".to_string(), id.clone());
            }
            row.insert("object".to_string(), Value::String(name.clone()));
            rows.push(Value::Object(row));
        }
    }
    Ok(Value::Array(rows))
}

/// Parse text into static table data by extension
pub(crate) fn parse_text(extension: &str, text: &str) -> OrigraphResult<Value> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "json" => Ok(serde_json::from_str(text)?),
        "csv" => parse_delimited(text, ','),
        "tsv" => parse_delimited(text, '\t'),
        "treejson" => Ok(flatten_tree(serde_json::from_str(text)?)),
        "topojson" => topojson_rows(serde_json::from_str(text)?),
        other => Err(OrigraphError::UnsupportedExtension(other.to_string())),
    }
}

impl NetworkModel {
    /// Wrap parsed data in a static table and attach a generic class
    pub fn add_static_table(&self, options: StaticTableOptions) -> OrigraphResult<ClassHandle> {
        let StaticTableOptions {
            name,
            data,
            attributes,
        } = options;
        let spec = match data {
            Value::Array(data) => TableSpec::Static { name, data },
            Value::Object(data) => TableSpec::StaticDict { name, data },
            other => {
                return Err(OrigraphError::InvalidOption(format!(
                    "static table data must be an array or an object, got {}",
                    other
                )))
            }
        };
        let class_id = self.mutate(|state| {
            let table_id = state.insert_table(spec, Vec::new())?;
            state
                .table_mut(&table_id)?
                .config
                .expected_attributes
                .extend(attributes);
            debug!("Model {}: static table {} added", state.model_id, table_id);
            state.insert_class(&table_id, ClassKind::Generic)
        })?;
        Ok(ClassHandle::new(self.clone(), class_id))
    }

    /// Parse `text` by extension and add it as a static table
    pub fn add_string_as_static_table(&self, options: StringTableOptions) -> OrigraphResult<ClassHandle> {
        let data = parse_text(&options.extension, &options.text)?;
        self.add_static_table(StaticTableOptions {
            name: options.name,
            data,
            attributes: Vec::new(),
        })
    }

    /// Read, parse and add a file, refusing files above the configured size
    /// unless `skip_size_check` is set
    pub async fn add_file_as_static_table(
        &self,
        options: FileTableOptions,
        reader: &dyn FileReader,
        mime: &dyn MimeLookup,
    ) -> OrigraphResult<ClassHandle> {
        let size = reader.file_size(&options.path).await?;
        let size_mb = size as f64 / (1024.0 * 1024.0);
        let limit_mb = self.config().max_file_size_mb;
        if !options.skip_size_check && size_mb > limit_mb as f64 {
            return Err(OrigraphError::FileTooLarge { size_mb, limit_mb });
        }

        let content_type = mime.content_type(&options.path);
        let extension = options
            .extension_override
            .clone()
            .or_else(|| content_type.as_deref().and_then(|ct| mime.extension(ct)))
            .ok_or_else(|| {
                OrigraphError::UnsupportedExtension(options.path.display().to_string())
            })?;
        let encoding = options
            .encoding
            .clone()
            .or_else(|| content_type.as_deref().and_then(|ct| mime.charset(ct)))
            .unwrap_or_else(|| "UTF-8".to_string());

        let text = reader.read_text(&options.path, &encoding).await?;
        let name = options
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        info!(
            "Model {}: loading {} ({:.1}MB) as {}",
            self.model_id(),
            name,
            size_mb,
            extension
        );
        self.add_string_as_static_table(StringTableOptions {
            name,
            extension,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrigraphConfig;
    use crate::events::MessageBus;
    use crate::functions::FunctionRegistry;
    use crate::table::IterateOptions;
    use futures::TryStreamExt;
    use serde_json::json;

    #[test]
    fn test_delimited_reader_handles_quotes() {
        let records: Vec<Vec<String>> =
            DelimitedReader::new("a,b\r\n\"x, y\",\"say \"\"hi\"\"\"\n1,2", ',').collect();
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["x, y".to_string(), "say \"hi\"".to_string()],
                vec!["1".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_csv_values_are_typed() {
        let rows = parse_text("csv", "name,count,ratio,ok\nx,3,0.5,true\ny,,n/a,false\n").unwrap();
        assert_eq!(
            rows,
            json!([
                {"name": "x", "count": 3, "ratio": 0.5, "ok": true},
                {"name": "y", "count": "", "ratio": "n/a", "ok": false}
            ])
        );
        let rows = parse_text("tsv", "a\tb\n1\tz").unwrap();
        assert_eq!(rows, json!([{"a": 1, "b": "z"}]));
    }

    #[test]
    fn test_tree_is_flattened_depth_first() {
        let rows = parse_text(
            "treejson",
            r#"{"name": "root", "children": [{"name": "a", "children": [{"name": "a1"}]}, {"name": "b"}]}"#,
        )
        .unwrap();
        let names: Vec<&str> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert_eq!(rows[0]["parent"], Value::Null);
        assert_eq!(rows[2]["parent"], json!(1));
        assert_eq!(rows[3]["parent"], json!(0));
    }

    #[test]
    fn test_topojson_geometries_become_rows() {
        let rows = parse_text(
            "topojson",
            r#"{"type": "Topology", "objects": {"states": {"type": "GeometryCollection", "geometries": [
                {"type": "Polygon", "id": "01", "properties": {"name": "Alabama"}},
                {"type": "Polygon", "id": "02", "properties": {"name": "Alaska"}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[1], json!({"name": "Alaska", "id": "02", "object": "states"}));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_text("xlsx", "").unwrap_err();
        assert!(matches!(err, OrigraphError::UnsupportedExtension(ext) if ext == "xlsx"));
    }

    #[tokio::test]
    async fn test_json_object_becomes_dict_table() {
        let model = NetworkModel::new("ingest");
        let class = model
            .add_string_as_static_table(StringTableOptions {
                name: "places".to_string(),
                extension: "json".to_string(),
                text: r#"{"north": {"pop": 1}, "south": {"pop": 2}}"#.to_string(),
            })
            .unwrap();
        let table = class.table().unwrap();
        assert_eq!(table.type_name().unwrap(), "StaticDictTable");
        let indexes: Vec<String> = table
            .iterate(IterateOptions::default())
            .map_ok(|item| item.index)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(indexes, vec!["north", "south"]);
    }

    #[test]
    fn test_expected_attributes_are_recorded() {
        let model = NetworkModel::new("ingest");
        let class = model
            .add_static_table(StaticTableOptions {
                name: "empty".to_string(),
                data: json!([]),
                attributes: vec!["a".to_string(), "b".to_string()],
            })
            .unwrap();
        assert_eq!(class.table().unwrap().attributes().unwrap(), vec!["a", "b"]);
        assert!(model
            .add_static_table(StaticTableOptions {
                name: "bad".to_string(),
                data: json!(3),
                attributes: vec![],
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_file_size_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.csv");
        let mut text = String::from("n\n");
        for i in 0..300_000 {
            text.push_str(&format!("{}\n", i));
        }
        std::fs::write(&path, &text).unwrap();

        let config = OrigraphConfig {
            max_file_size_mb: 1,
            ..OrigraphConfig::default()
        };
        let model = NetworkModel::with_parts(
            "guarded".to_string(),
            "guarded".to_string(),
            FunctionRegistry::new(),
            MessageBus::new(),
            config,
        );
        let options = FileTableOptions {
            path: path.clone(),
            ..FileTableOptions::default()
        };
        let err = model
            .add_file_as_static_table(options.clone(), &TokioFileReader, &ExtensionMimeLookup)
            .await
            .unwrap_err();
        assert!(matches!(err, OrigraphError::FileTooLarge { limit_mb: 1, .. }));

        let class = model
            .add_file_as_static_table(
                FileTableOptions {
                    skip_size_check: true,
                    ..options
                },
                &TokioFileReader,
                &ExtensionMimeLookup,
            )
            .await
            .unwrap();
        assert_eq!(class.table().unwrap().count_rows().await.unwrap(), 300_000);
        assert_eq!(class.class_name().unwrap(), "big.csv");
    }
}
