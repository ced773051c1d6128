// ABOUTME: In-memory database implementing both mirroring seams, for tests
// ABOUTME: Emulates ordered seeks, upserts, key deletes and view dependency failures

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use mysql_async::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::cursor::{compare_tuples, CursorPosition, KeySet, RowBatch, SortValue};
use super::store::{Catalog, MirrorDatabase, ObjectKind, ReadRequest, Routine, SourceDatabase};

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<String>,
    key_columns: Vec<String>,
    rows: BTreeMap<Vec<SortValue>, Vec<Value>>,
}

impl MemTable {
    fn index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    fn key_of(&self, row: &[Value]) -> Vec<SortValue> {
        self.key_columns
            .iter()
            .filter_map(|c| self.index(c))
            .map(|i| SortValue(row[i].clone()))
            .collect()
    }

    fn project(&self, row: &[Value], columns: &[String]) -> Vec<Value> {
        columns
            .iter()
            .map(|c| self.index(c).map(|i| row[i].clone()).unwrap_or(Value::NULL))
            .collect()
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemTable>,
    templates: BTreeMap<String, (Vec<String>, Vec<String>)>,
    views: BTreeMap<String, String>,
    routines: Vec<(Routine, String)>,
    created_objects: Vec<String>,
    failing: HashMap<String, String>,
    failing_reads: HashMap<String, usize>,
    failing_lists: HashMap<ObjectKind, String>,
    stalled: Vec<String>,
    stale_positions: HashMap<String, CursorPosition>,
    executed: Vec<String>,
    reads: Vec<(String, ReadRequest)>,
    upserts: usize,
    deletes: Vec<usize>,
}

/// A database held in memory. Serves as either side of a mirror in tests.
pub struct MemoryDatabase {
    name: String,
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// An empty mirror able to create any of `source`'s tables via DDL.
    pub fn mirror_of(source: &MemoryDatabase) -> Self {
        let mirror = Self::new("mirror");
        {
            let src = source.lock();
            let mut dst = mirror.lock();
            for (name, table) in &src.tables {
                dst.templates.insert(
                    name.clone(),
                    (table.columns.clone(), table.key_columns.clone()),
                );
            }
        }
        mirror
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_table(&self, name: &str, columns: &[&str], key_columns: &[&str]) {
        let table = MemTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            rows: BTreeMap::new(),
        };
        self.lock().tables.insert(name.to_string(), table);
    }

    pub fn insert(&self, table: &str, row: Vec<Value>) {
        let mut state = self.lock();
        let t = state.tables.get_mut(table).expect("table exists");
        let key = t.key_of(&row);
        t.rows.insert(key, row);
    }

    pub fn remove(&self, table: &str, key: Vec<Value>) {
        let mut state = self.lock();
        let t = state.tables.get_mut(table).expect("table exists");
        t.rows.remove(&key.into_iter().map(SortValue).collect::<Vec<_>>());
    }

    /// Register a view whose definition selects from `depends_on`.
    pub fn add_view(&self, name: &str, depends_on: &[&str]) {
        let sources = depends_on
            .iter()
            .map(|d| format!("`{}`", d))
            .collect::<Vec<_>>()
            .join(" join ");
        let definition = format!(
            "CREATE ALGORITHM=UNDEFINED DEFINER=`app`@`%` SQL SECURITY DEFINER VIEW `{}` AS select * from {}",
            name, sources
        );
        self.lock().views.insert(name.to_string(), definition);
    }

    pub fn add_routine(&self, name: &str, kind: ObjectKind) {
        let definition = format!(
            "CREATE DEFINER=`app`@`%` {} `{}`() RETURNS int DETERMINISTIC RETURN 1",
            kind.keyword(),
            name
        );
        let routine = Routine {
            name: name.to_string(),
            kind,
        };
        self.lock().routines.push((routine, definition));
    }

    /// Make creating the object `name` fail with `message`.
    pub fn fail_object(&self, name: &str, message: &str) {
        self.lock()
            .failing
            .insert(name.to_string(), message.to_string());
    }

    /// Let `successful` reads of `table` succeed, then fail every read after.
    pub fn fail_reads_after(&self, table: &str, successful: usize) {
        self.lock()
            .failing_reads
            .insert(table.to_string(), successful);
    }

    /// Make listing views (`ObjectKind::View`) or routines (any routine kind) fail.
    pub fn fail_listing(&self, kind: ObjectKind, message: &str) {
        let kind = match kind {
            ObjectKind::Procedure => ObjectKind::Function,
            other => other,
        };
        self.lock().failing_lists.insert(kind, message.to_string());
    }

    /// Make `show_create` for `name` hang forever.
    pub fn stall_object(&self, name: &str) {
        self.lock().stalled.push(name.to_string());
    }

    /// Report `position` as the mirror's maximum for `table` regardless of
    /// its rows, as a lagging read would. Values keep the driver's binary
    /// shapes (`Date`, `Int`).
    pub fn report_stale_position(&self, table: &str, position: CursorPosition) {
        self.lock()
            .stale_positions
            .insert(table.to_string(), position);
    }

    /// Rows of a table ordered by key.
    pub fn snapshot(&self, table: &str) -> Vec<Vec<Value>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn view_names(&self) -> Vec<String> {
        self.lock().views.keys().cloned().collect()
    }

    /// Views and routines in the order they were created.
    pub fn created_objects(&self) -> Vec<String> {
        self.lock().created_objects.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn reads(&self) -> Vec<(String, ReadRequest)> {
        self.lock().reads.clone()
    }

    pub fn upsert_statements(&self) -> usize {
        self.lock().upserts
    }

    pub fn delete_statements(&self) -> Vec<usize> {
        self.lock().deletes.clone()
    }
}

fn object_name(statement: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(?:TABLE|VIEW|FUNCTION|PROCEDURE)\s+(?:IF\s+EXISTS\s+)?`([^`]+)`")
        .expect("valid regex");
    re.captures(statement).map(|c| c[1].to_string())
}

fn referenced_names(statement: &str) -> Vec<String> {
    let re = Regex::new(r"(?i)(?:from|join)\s+`([^`]+)`").expect("valid regex");
    re.captures_iter(statement).map(|c| c[1].to_string()).collect()
}

#[async_trait]
impl Catalog for MemoryDatabase {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.lock().tables.keys().cloned().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let state = self.lock();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", self.name, table))?;
        Ok(t.key_columns.clone())
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.index(column).is_some())
            .unwrap_or(false))
    }

    async fn key_set(&self, table: &str, key_columns: &[String]) -> Result<KeySet> {
        let state = self.lock();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", self.name, table))?;
        Ok(KeySet::from_keys(
            t.rows.values().map(|row| t.project(row, key_columns)),
        ))
    }
}

#[async_trait]
impl SourceDatabase for MemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn list_views(&self) -> Result<Vec<String>> {
        if let Some(message) = self.lock().failing_lists.get(&ObjectKind::View).cloned() {
            bail!("{}", message);
        }
        Ok(self.view_names())
    }

    async fn list_routines(&self) -> Result<Vec<Routine>> {
        if let Some(message) = self.lock().failing_lists.get(&ObjectKind::Function).cloned() {
            bail!("{}", message);
        }
        let mut routines: Vec<Routine> = self.lock().routines.iter().map(|(r, _)| r.clone()).collect();
        routines.sort_by_key(|r| r.kind == ObjectKind::Procedure);
        Ok(routines)
    }

    async fn show_create(&self, kind: ObjectKind, name: &str) -> Result<String> {
        let stalled = self.lock().stalled.iter().any(|s| s == name);
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.lock();
        let found = match kind {
            ObjectKind::Table => state.tables.get(name).map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| format!("  `{}` varchar(255) DEFAULT NULL", c))
                    .collect::<Vec<_>>()
                    .join(",\n");
                let keys = t
                    .key_columns
                    .iter()
                    .map(|c| format!("`{}`", c))
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "CREATE TABLE `{}`.`{}` (\n{},\n  PRIMARY KEY ({})\n) ENGINE=MyISAM DEFAULT CHARSET=latin1 ROW_FORMAT=COMPACT",
                    self.name, name, cols, keys
                )
            }),
            ObjectKind::View => state.views.get(name).cloned(),
            ObjectKind::Function | ObjectKind::Procedure => state
                .routines
                .iter()
                .find(|(r, _)| r.name == name && r.kind == kind)
                .map(|(_, def)| def.clone()),
        };
        found.ok_or_else(|| anyhow!("{} {} does not exist", kind, name))
    }

    async fn read_rows(&self, table: &str, request: &ReadRequest) -> Result<RowBatch> {
        let mut state = self.lock();
        state.reads.push((table.to_string(), request.clone()));

        if let Some(remaining) = state.failing_reads.get_mut(table) {
            if *remaining == 0 {
                bail!("Lost connection to MySQL server during query");
            }
            *remaining -= 1;
        }

        let t = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", self.name, table))?;

        let mut rows: Vec<(Vec<Value>, Vec<Value>)> = t
            .rows
            .values()
            .map(|row| (t.project(row, &request.order_by), row.clone()))
            .filter(|(order, _)| match &request.after {
                // NULL never satisfies a comparison in SQL
                Some(after) => {
                    !order.iter().any(|v| *v == Value::NULL)
                        && compare_tuples(order, after) == Ordering::Greater
                }
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| compare_tuples(&a.0, &b.0));
        rows.truncate(request.limit);

        Ok(RowBatch::new(
            t.columns.clone(),
            rows.into_iter().map(|(_, row)| row).collect(),
        ))
    }
}

#[async_trait]
impl MirrorDatabase for MemoryDatabase {
    async fn max_position(
        &self,
        table: &str,
        timestamp_column: &str,
        key_columns: &[String],
    ) -> Result<Option<CursorPosition>> {
        let state = self.lock();
        if let Some(position) = state.stale_positions.get(table) {
            return Ok(Some(position.clone()));
        }
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", self.name, table))?;
        let ts_index = t
            .index(timestamp_column)
            .ok_or_else(|| anyhow!("Unknown column '{}'", timestamp_column))?;

        Ok(t.rows
            .values()
            .filter(|row| row[ts_index] != Value::NULL)
            .map(|row| CursorPosition::new(row[ts_index].clone(), t.project(row, key_columns)))
            .max())
    }

    async fn upsert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<u64> {
        let mut state = self.lock();
        state.upserts += 1;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table 'mirror.{}' doesn't exist", table))?;

        for row in rows {
            let mut full = vec![Value::NULL; t.columns.len()];
            for (column, value) in columns.iter().zip(row.iter()) {
                let i = t
                    .index(column)
                    .ok_or_else(|| anyhow!("Unknown column '{}' in 'field list'", column))?;
                full[i] = value.clone();
            }
            let key = t.key_of(&full);
            t.rows.insert(key, full);
        }
        Ok(rows.len() as u64)
    }

    async fn delete_keys(
        &self,
        table: &str,
        _key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64> {
        let mut state = self.lock();
        state.deletes.push(keys.len());
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table 'mirror.{}' doesn't exist", table))?;

        let mut deleted = 0;
        for key in keys {
            let key: Vec<SortValue> = key.iter().cloned().map(SortValue).collect();
            if t.rows.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        let mut state = self.lock();
        state.executed.push(statement.to_string());

        let upper = statement.trim_start().to_uppercase();
        let name = object_name(statement);

        if upper.starts_with("DROP") {
            if let Some(name) = name {
                state.views.remove(&name);
                state.routines.retain(|(r, _)| r.name != name);
            }
            return Ok(());
        }

        if !upper.starts_with("CREATE") || upper.starts_with("CREATE INDEX") {
            return Ok(());
        }

        let name = name.ok_or_else(|| anyhow!("You have an error in your SQL syntax"))?;
        if let Some(message) = state.failing.get(&name) {
            bail!("{}", message);
        }

        if upper.contains(" TABLE ") {
            let (columns, keys) = state
                .templates
                .get(&name)
                .cloned()
                .ok_or_else(|| anyhow!("No template for table {}", name))?;
            state.tables.insert(
                name,
                MemTable {
                    columns,
                    key_columns: keys,
                    rows: BTreeMap::new(),
                },
            );
        } else if upper.contains(" VIEW ") {
            for dependency in referenced_names(statement) {
                if !state.tables.contains_key(&dependency) && !state.views.contains_key(&dependency)
                {
                    bail!("Table '{}.{}' doesn't exist", self.name, dependency);
                }
            }
            state.views.insert(name.clone(), statement.to_string());
            state.created_objects.push(name);
        } else {
            let kind = if upper.contains(" PROCEDURE ") {
                ObjectKind::Procedure
            } else {
                ObjectKind::Function
            };
            state.routines.push((
                Routine {
                    name: name.clone(),
                    kind,
                },
                statement.to_string(),
            ));
            state.created_objects.push(name);
        }
        Ok(())
    }

    async fn analyze(&self, table: &str) -> Result<()> {
        self.lock().executed.push(format!("ANALYZE TABLE `{}`", table));
        Ok(())
    }
}
