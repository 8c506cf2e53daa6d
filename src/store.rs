use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRows {
    pub header: Vec<String>,
    pub records: Vec<BTreeMap<String, String>>,
}

pub trait TableStore {
    fn table_names(&self) -> Result<Vec<String>>;
    fn read_all_rows(&self, table: &str) -> Result<TableRows>;
    fn ensure_table(&mut self, table: &str) -> Result<()>;
    fn clear(&mut self, table: &str) -> Result<()>;
    fn write_rows(&mut self, table: &str, header: &[String], rows: &[Vec<String>]) -> Result<()>;
    fn append_rows(&mut self, table: &str, rows: &[Vec<String>]) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub schema_version: u32,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self {
            schema_version: 1,
            tables: Vec::new(),
        }
    }
}

impl Workbook {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn table_mut(&mut self, name: &str) -> &mut Table {
        let idx = match self.tables.iter().position(|t| t.name == name) {
            Some(idx) => idx,
            None => {
                self.tables.push(Table {
                    name: name.to_string(),
                    ..Table::default()
                });
                self.tables.len() - 1
            }
        };
        &mut self.tables[idx]
    }
}

impl TableStore for Workbook {
    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn read_all_rows(&self, table: &str) -> Result<TableRows> {
        let Some(found) = self.table(table) else {
            bail!("table {table} not found");
        };

        let records = found
            .rows
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|row| {
                found
                    .header
                    .iter()
                    .enumerate()
                    .filter(|(_, column)| !column.is_empty())
                    .map(|(idx, column)| (column.clone(), row.get(idx).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        Ok(TableRows {
            header: found.header.clone(),
            records,
        })
    }

    fn ensure_table(&mut self, table: &str) -> Result<()> {
        self.table_mut(table);
        Ok(())
    }

    fn clear(&mut self, table: &str) -> Result<()> {
        let target = self.table_mut(table);
        target.header.clear();
        target.rows.clear();
        Ok(())
    }

    fn write_rows(&mut self, table: &str, header: &[String], rows: &[Vec<String>]) -> Result<()> {
        let target = self.table_mut(table);
        target.header = header.to_vec();
        target.rows = rows.to_vec();
        Ok(())
    }

    fn append_rows(&mut self, table: &str, rows: &[Vec<String>]) -> Result<()> {
        self.table_mut(table).rows.extend_from_slice(rows);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonWorkbookStore {
    path: PathBuf,
}

impl JsonWorkbookStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Workbook> {
        load_workbook(&self.path)
    }

    fn update(&mut self, op: impl FnOnce(&mut Workbook) -> Result<()>) -> Result<()> {
        let mut workbook = load_workbook(&self.path)?;
        op(&mut workbook)?;
        save_workbook(&self.path, &workbook)
    }
}

impl TableStore for JsonWorkbookStore {
    fn table_names(&self) -> Result<Vec<String>> {
        self.load()?.table_names()
    }

    fn read_all_rows(&self, table: &str) -> Result<TableRows> {
        self.load()?
            .read_all_rows(table)
            .with_context(|| format!("failed to read workbook {}", self.path.display()))
    }

    fn ensure_table(&mut self, table: &str) -> Result<()> {
        self.update(|wb| wb.ensure_table(table))
    }

    fn clear(&mut self, table: &str) -> Result<()> {
        self.update(|wb| wb.clear(table))
    }

    fn write_rows(&mut self, table: &str, header: &[String], rows: &[Vec<String>]) -> Result<()> {
        self.update(|wb| wb.write_rows(table, header, rows))
    }

    fn append_rows(&mut self, table: &str, rows: &[Vec<String>]) -> Result<()> {
        self.update(|wb| wb.append_rows(table, rows))
    }
}

pub fn load_workbook(path: &Path) -> Result<Workbook> {
    if !path.exists() {
        return Ok(Workbook::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workbook file {}", path.display()))?;
    let workbook = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse workbook file {}", path.display()))?;
    Ok(workbook)
}

pub fn save_workbook(path: &Path, workbook: &Workbook) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create workbook directory {}", parent.display()))?;
    }

    let serialized = serde_json::to_string_pretty(workbook)?;
    std::fs::write(path, serialized)
        .with_context(|| format!("failed to write workbook file {}", path.display()))?;
    Ok(())
}
