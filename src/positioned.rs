//! Positioned update, delete, add and refresh for an engine that only
//! offers predicate-addressed statements.
//!
//! A row is addressed by equality on every column of its base table. An
//! engine-side delete removes every byte-identical copy, so deleting one
//! of several duplicates re-inserts the others afterwards. Each statement
//! is its own engine round trip; a failure part way through leaves the
//! earlier statements applied.

use crate::catalog::{count_where, probe_columns};
use crate::codec::CommandKind;
use crate::error::{Error, Result};
use crate::session::QueryRunner;
use crate::table::{ResultTable, SqlType};

/// Outcome of a positioned operation for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// Refreshed from the base table
    Success,
    Updated,
    Deleted,
    Added,
    /// The statement for this row failed
    Error,
    /// The row no longer matches anything in the base table
    NoRow,
}

/// Rows an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTarget {
    /// One row of the result, by index
    Row(usize),
    /// Every row of the result
    Rowset,
}

impl RowTarget {
    fn rows(self, table: &ResultTable) -> Result<Vec<usize>> {
        let count = table.row_count();
        match self {
            RowTarget::Row(row) if row < count => Ok(vec![row]),
            RowTarget::Row(row) => Err(Error::Positioned(format!(
                "row {} is outside a rowset of {} rows",
                row, count
            ))),
            RowTarget::Rowset => Ok((0..count).collect()),
        }
    }
}

/// Column order and types of the table a result was drawn from
#[derive(Debug, Clone)]
struct BaseTable {
    name: String,
    columns: Vec<(String, SqlType)>,
}

impl BaseTable {
    fn column_type(&self, name: &str) -> Option<SqlType> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, sql_type)| *sql_type)
    }

    fn reject_inexact(&self) -> Result<()> {
        match self.columns.iter().find(|(_, t)| *t == SqlType::Float) {
            Some((name, _)) => Err(Error::Positioned(format!(
                "{}.{} is a floating-point column and cannot address a row",
                self.name, name
            ))),
            None => Ok(()),
        }
    }
}

/// Render a cell as a statement literal
pub fn literal(sql_type: SqlType, value: Option<&str>) -> String {
    match (value, sql_type) {
        (None, _) => "NULL".to_string(),
        (Some(v), SqlType::Integer | SqlType::Float) => v.to_string(),
        // Temporal values keep the engine's own notation
        (Some(v), SqlType::Date | SqlType::Time | SqlType::Timestamp) => v.to_string(),
        (Some(v), _) => format!("'{}'", v.replace('\'', "''")),
    }
}

/// `a = 1 and b IS NULL ...` over the given columns
pub fn where_clause<'v>(columns: impl IntoIterator<Item = (&'v str, SqlType, Option<&'v str>)>) -> String {
    columns
        .into_iter()
        .map(|(name, sql_type, value)| match value {
            None => format!("{} IS NULL", name),
            Some(_) => format!("{} = {}", name, literal(sql_type, value)),
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Applies positioned operations to a single-table result
pub struct PositionedOpExecutor<'a, R: QueryRunner + ?Sized> {
    runner: &'a R,
    max_statement_bytes: usize,
}

impl<'a, R: QueryRunner + ?Sized> PositionedOpExecutor<'a, R> {
    pub fn new(runner: &'a R, max_statement_bytes: usize) -> Self {
        Self {
            runner,
            max_statement_bytes: max_statement_bytes.max(1),
        }
    }

    fn base_table(&self, table: &ResultTable) -> Result<BaseTable> {
        let name = table.single_source_table().ok_or_else(|| {
            Error::Positioned("result columns are not drawn from exactly one table".to_string())
        })?;
        let probe = probe_columns(self.runner, name)?;
        Ok(BaseTable {
            name: name.to_string(),
            columns: probe
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.sql_type()))
                .collect(),
        })
    }

    // Predicate over the projected columns of one result row
    fn projected_clause(&self, base: &BaseTable, table: &ResultTable, row: usize) -> Result<String> {
        let values = table.row(row).ok_or_else(|| Error::NoSuchCell {
            row,
            column: String::new(),
        })?;
        Ok(where_clause(table.columns().iter().zip(values).map(|(column, value)| {
            let sql_type = base.column_type(column.name()).unwrap_or(column.sql_type());
            (column.name(), sql_type, value)
        })))
    }

    // Every base column's value for one result row. Columns the result does
    // not project are read back from the table. `None` when the row is gone.
    fn full_row(&self, base: &BaseTable, table: &ResultTable, row: usize) -> Result<Option<Vec<Option<String>>>> {
        let values = table.row(row).ok_or_else(|| Error::NoSuchCell {
            row,
            column: String::new(),
        })?;

        let projected: Option<Vec<Option<String>>> = base
            .columns
            .iter()
            .map(|(name, _)| table.column_index(name).map(|i| values[i].map(str::to_string)))
            .collect();
        if let Some(full) = projected {
            return Ok(Some(full));
        }

        let query = format!(
            "select * from {} where {}",
            base.name,
            self.projected_clause(base, table, row)?
        );
        let found = self.runner.execute(CommandKind::Query, &query)?.into_table();
        if found.columns().len() != base.columns.len() {
            return Err(Error::parse(
                0,
                format!(
                    "{} has {} columns but the probe reported {}",
                    base.name,
                    found.columns().len(),
                    base.columns.len()
                ),
            ));
        }
        Ok(found
            .row(0)
            .map(|cells| cells.into_iter().map(|c| c.map(str::to_string)).collect()))
    }

    fn full_clause(base: &BaseTable, full: &[Option<String>]) -> String {
        where_clause(
            base.columns
                .iter()
                .zip(full)
                .map(|((name, sql_type), value)| (name.as_str(), *sql_type, value.as_deref())),
        )
    }

    /// Re-read rows from the base table
    pub fn refresh(&self, table: &mut ResultTable, target: RowTarget) -> Result<Vec<RowStatus>> {
        let base = self.base_table(table)?;
        base.reject_inexact()?;

        let mut statuses = Vec::new();
        for row in target.rows(table)? {
            let query = format!(
                "select * from {} where {}",
                base.name,
                self.projected_clause(&base, table, row)?
            );
            let found = self.runner.execute(CommandKind::Query, &query)?.into_table();
            if found.row_count() == 0 {
                statuses.push(RowStatus::Deleted);
                continue;
            }

            let mut cells = Vec::with_capacity(table.columns().len());
            for column in table.columns() {
                let index = found.column_index(column.name()).ok_or_else(|| {
                    Error::parse(0, format!("refresh of {} lost column {}", base.name, column.name()))
                })?;
                cells.push(found.columns()[index].cells()[0].clone());
            }
            table.replace_row(row, cells)?;
            statuses.push(RowStatus::Success);
        }
        Ok(statuses)
    }

    /// Overwrite rows with `new_rows`, one per targeted row, in the
    /// result's column order
    pub fn update(
        &self,
        table: &mut ResultTable,
        target: RowTarget,
        new_rows: &[Vec<Option<String>>],
    ) -> Result<Vec<RowStatus>> {
        let rows = target.rows(table)?;
        if rows.len() != new_rows.len() {
            return Err(Error::Positioned(format!(
                "{} rows targeted but {} new rows given",
                rows.len(),
                new_rows.len()
            )));
        }
        let width = table.columns().len();
        if let Some(bad) = new_rows.iter().find(|r| r.len() != width) {
            return Err(Error::Positioned(format!(
                "new row has {} values, the result has {} columns",
                bad.len(),
                width
            )));
        }

        let base = self.base_table(table)?;
        base.reject_inexact()?;

        let mut statuses = Vec::with_capacity(rows.len());
        for (row, new_values) in rows.into_iter().zip(new_rows) {
            let Some(full) = self.full_row(&base, table, row)? else {
                statuses.push(RowStatus::NoRow);
                continue;
            };

            let assignments: Vec<String> = table
                .columns()
                .iter()
                .zip(new_values)
                .filter_map(|(column, value)| {
                    let sql_type = base.column_type(column.name())?;
                    Some(format!("{} = {}", column.name(), literal(sql_type, value.as_deref())))
                })
                .collect();
            if assignments.is_empty() {
                return Err(Error::Positioned(format!(
                    "no updatable column of {} in the result",
                    base.name
                )));
            }

            let statement = format!(
                "update {} set {} where {}",
                base.name,
                assignments.join(", "),
                Self::full_clause(&base, &full)
            );
            self.runner.execute(CommandKind::Query, &statement)?;
            table.replace_row(row, new_values.clone())?;
            statuses.push(RowStatus::Updated);
        }
        Ok(statuses)
    }

    /// Delete rows. Byte-identical duplicates of a deleted row that should
    /// survive are re-inserted after the delete.
    pub fn delete(&self, table: &ResultTable, target: RowTarget) -> Result<Vec<RowStatus>> {
        let rows = target.rows(table)?;
        let base = self.base_table(table)?;
        base.reject_inexact()?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(full) = self.full_row(&base, table, row)? else {
                statuses.push(RowStatus::NoRow);
                continue;
            };
            let clause = Self::full_clause(&base, &full);

            let matches = count_where(self.runner, &base.name, Some(&clause))?;
            if matches == 0 {
                statuses.push(RowStatus::NoRow);
                continue;
            }

            self.runner
                .execute(CommandKind::Query, &format!("delete from {} where {}", base.name, clause))?;

            if matches > 1 {
                log::debug!(
                    "restoring {} duplicate rows of {} after positioned delete",
                    matches - 1,
                    base.name
                );
                let insert = format!("insert into {} values ({})", base.name, Self::tuple(&base, &full));
                for _ in 1..matches {
                    self.runner.execute(CommandKind::Query, &insert)?;
                }
            }
            statuses.push(RowStatus::Deleted);
        }
        Ok(statuses)
    }

    fn tuple(base: &BaseTable, full: &[Option<String>]) -> String {
        base.columns
            .iter()
            .zip(full)
            .map(|((_, sql_type), value)| literal(*sql_type, value.as_deref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Insert `rows`, given in the result's column order, with as few
    /// multi-row statements as the statement size allows
    pub fn add(&self, table: &ResultTable, rows: &[Vec<Option<String>>]) -> Result<Vec<RowStatus>> {
        let base = self.base_table(table)?;
        let width = table.columns().len();

        let mut types = Vec::with_capacity(width);
        for column in table.columns() {
            let sql_type = base.column_type(column.name()).ok_or_else(|| {
                Error::Positioned(format!("{} has no column {}", base.name, column.name()))
            })?;
            types.push(sql_type);
        }

        let head = format!(
            "insert into {}({}) values ",
            base.name,
            table.column_names().join(", ")
        );

        let mut statuses = vec![RowStatus::NoRow; rows.len()];
        let mut statement = head.clone();
        let mut pending: Vec<usize> = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            if row.len() != width {
                statuses[index] = RowStatus::Error;
                continue;
            }
            let tuple = format!(
                "({})",
                types
                    .iter()
                    .zip(row)
                    .map(|(t, v)| literal(*t, v.as_deref()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            if !pending.is_empty() && statement.len() + 2 + tuple.len() > self.max_statement_bytes {
                self.flush_insert(&statement, &pending, &mut statuses)?;
                statement = head.clone();
                pending.clear();
            }
            if !pending.is_empty() {
                statement.push_str(", ");
            }
            statement.push_str(&tuple);
            pending.push(index);
        }
        if !pending.is_empty() {
            self.flush_insert(&statement, &pending, &mut statuses)?;
        }
        Ok(statuses)
    }

    fn flush_insert(&self, statement: &str, rows: &[usize], statuses: &mut [RowStatus]) -> Result<()> {
        let status = match self.runner.execute(CommandKind::Query, statement) {
            Ok(_) => RowStatus::Added,
            Err(e) if e.is_session_usable() => {
                log::warn!("insert of {} rows failed: {}", rows.len(), e);
                RowStatus::Error
            }
            Err(e) => return Err(e),
        };
        for &row in rows {
            statuses[row] = status;
        }
        Ok(())
    }
}
