use crate::schema::{FieldRecord, RawSource, SourceCell, SourceColumn, SourceRow};
use crate::values::CellValue;
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Column identifier to title lookup for one source.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    by_id: HashMap<u64, String>,
    by_virtual_id: HashMap<u64, String>,
}

impl ColumnMap {
    pub fn from_columns(columns: &[SourceColumn]) -> Self {
        let mut map = Self::default();
        for column in columns {
            if let Some(id) = column.id {
                map.by_id.insert(id, column.title.clone());
            }
            if let Some(virtual_id) = column.virtual_id {
                map.by_virtual_id.insert(virtual_id, column.title.clone());
            }
        }
        map
    }

    /// Resolves a cell's column title, preferring its virtual column id.
    pub fn title_for(&self, cell: &SourceCell) -> Option<&str> {
        cell.virtual_column_id
            .and_then(|id| self.by_virtual_id.get(&id))
            .or_else(|| cell.column_id.and_then(|id| self.by_id.get(&id)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_virtual_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Translates raw source rows into `FieldRecord`s.
pub struct Normalizer<'a> {
    dictionary: &'a BTreeMap<String, String>,
}

impl<'a> Normalizer<'a> {
    pub fn new(dictionary: &'a BTreeMap<String, String>) -> Self {
        Self { dictionary }
    }

    pub fn normalize(&self, source: &RawSource) -> Vec<FieldRecord> {
        let columns = ColumnMap::from_columns(&source.columns);
        let sheet_names: HashMap<u64, &str> = source
            .source_sheets
            .iter()
            .map(|sheet| (sheet.id, sheet.name.as_str()))
            .collect();

        let mut dropped_cells = 0usize;
        let records: Vec<FieldRecord> = source
            .rows
            .iter()
            .map(|row| {
                let (record, dropped) = self.normalize_row(row, &columns, &sheet_names, source);
                dropped_cells += dropped;
                record
            })
            .collect();

        debug!(
            "Normalized {} rows from {} ({} columns, {} unresolved cells dropped)",
            records.len(),
            source.label(),
            columns.len(),
            dropped_cells
        );

        records
    }

    fn normalize_row(
        &self,
        row: &SourceRow,
        columns: &ColumnMap,
        sheet_names: &HashMap<u64, &str>,
        source: &RawSource,
    ) -> (FieldRecord, usize) {
        let mut record = FieldRecord::default();
        let mut dropped = 0;

        for cell in &row.cells {
            let Some(title) = columns.title_for(cell) else {
                dropped += 1;
                continue;
            };

            let field = self.field_name(title);
            record.set(field, cell.effective_value());
        }

        record.sheet_name = row
            .sheet_name
            .clone()
            .or_else(|| {
                row.sheet_id
                    .and_then(|id| sheet_names.get(&id))
                    .map(|name| name.to_string())
            })
            .or_else(|| source.name.clone());

        (record, dropped)
    }

    /// Dictionary field name for a column title; unmapped titles pass through verbatim.
    pub fn field_name<'t>(&'t self, title: &'t str) -> &'t str {
        self.dictionary
            .get(title)
            .or_else(|| self.dictionary.get(title.trim()))
            .map(String::as_str)
            .unwrap_or(title)
    }
}

/// Column lookup plus column order for one source, built once and reused per row.
#[derive(Debug, Clone, Default)]
pub struct ColumnLayout {
    columns: ColumnMap,
    order: HashMap<String, usize>,
}

impl ColumnLayout {
    pub fn from_source(source: &RawSource) -> Self {
        let mut order = HashMap::new();
        for (idx, column) in source.columns.iter().enumerate() {
            order.entry(column.title.clone()).or_insert(idx);
        }
        Self {
            columns: ColumnMap::from_columns(&source.columns),
            order,
        }
    }

    /// Row cells keyed by column title, in column order. Used by positional parsers.
    pub fn titled_cells(&self, row: &SourceRow) -> Vec<(String, CellValue)> {
        let mut cells: Vec<(usize, String, CellValue)> = row
            .cells
            .iter()
            .filter_map(|cell| {
                let title = self.columns.title_for(cell)?;
                let position = self.order.get(title).copied().unwrap_or(usize::MAX);
                Some((position, title.to_string(), cell.effective_value()))
            })
            .collect();

        cells.sort_by_key(|(position, _, _)| *position);
        cells
            .into_iter()
            .map(|(_, title, value)| (title, value))
            .collect()
    }
}
