//! Column-oriented materialization of engine responses.

use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// SQL types the engine's type tokens map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Varchar,
    Char,
    Integer,
    Float,
    Date,
    Time,
    Timestamp,
    Unknown,
}

impl SqlType {
    /// Map an engine type token, such as `varchar(20)`, `int` or
    /// `string(char(3))`, to a type and its declared length
    pub fn parse(token: &str) -> (SqlType, Option<usize>) {
        let token = token.trim().to_ascii_lowercase();
        let (name, arg) = split_call(&token);

        // Type families wrap the concrete type: number(integer), string(varchar(8))
        if let (Some(inner), "string" | "number" | "datetime") = (arg, name) {
            let parsed = SqlType::parse(inner);
            if parsed.0 != SqlType::Unknown {
                return parsed;
            }
        }

        let sql_type = match name {
            "varchar" | "varchar2" | "string" | "text" | "char_varying" => SqlType::Varchar,
            "char" | "character" => SqlType::Char,
            "int" | "integer" | "smallint" | "bigint" => SqlType::Integer,
            "float" | "real" | "double" | "decimal" | "numeric" => SqlType::Float,
            "date" => SqlType::Date,
            "time" => SqlType::Time,
            "datetime" | "timestamp" => SqlType::Timestamp,
            _ => SqlType::Unknown,
        };
        let length = arg.and_then(|a| a.trim().parse::<usize>().ok());
        (sql_type, length)
    }

    /// Size used when the engine declared none
    pub fn default_length(self) -> usize {
        match self {
            SqlType::Varchar => 4000,
            SqlType::Char => 1,
            SqlType::Integer => 11,
            SqlType::Float => 24,
            SqlType::Date => 10,
            SqlType::Time => 8,
            SqlType::Timestamp => 19,
            SqlType::Unknown => 4000,
        }
    }

    /// ODBC SQL data type code
    pub fn odbc_code(self) -> i16 {
        match self {
            SqlType::Char => 1,
            SqlType::Integer => 4,
            SqlType::Float => 6,
            SqlType::Varchar | SqlType::Unknown => 12,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SqlType::Varchar => "varchar",
            SqlType::Char => "char",
            SqlType::Integer => "integer",
            SqlType::Float => "float",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::Timestamp => "timestamp",
            SqlType::Unknown => "unknown",
        }
    }

    pub fn is_character(self) -> bool {
        matches!(self, SqlType::Varchar | SqlType::Char | SqlType::Unknown)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::Float)
    }
}

// "varchar(20)" -> ("varchar", Some("20")); "int" -> ("int", None)
fn split_call(token: &str) -> (&str, Option<&str>) {
    match (token.find('('), token.ends_with(')')) {
        (Some(open), true) => (token[..open].trim(), Some(&token[open + 1..token.len() - 1])),
        _ => (token, None),
    }
}

/// One result column: field metadata plus its cells
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    table: Option<String>,
    sql_type: SqlType,
    declared_length: Option<usize>,
    nullable: bool,
    cells: Vec<Option<String>>,
    size: OnceCell<usize>,
    max_value_length: OnceCell<usize>,
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.table == other.table
            && self.sql_type == other.sql_type
            && self.declared_length == other.declared_length
            && self.nullable == other.nullable
            && self.cells == other.cells
    }
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            table: None,
            sql_type,
            declared_length: None,
            nullable: true,
            cells: Vec::new(),
            size: OnceCell::new(),
            max_value_length: OnceCell::new(),
        }
    }

    /// Column from a TAPI header pair: `table.column` and a type token
    pub fn from_header(qualified: &str, type_token: &str) -> Self {
        let (table, name) = match qualified.rsplit_once('.') {
            Some((table, name)) if !table.is_empty() => (Some(table.to_string()), name),
            _ => (None, qualified),
        };
        let (sql_type, length) = SqlType::parse(type_token);
        let mut column = Column::new(name, sql_type);
        column.table = table;
        column.declared_length = length;
        column
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.declared_length = Some(length);
        self.size = OnceCell::new();
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relation the column was drawn from, when the engine said so
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn declared_length(&self) -> Option<usize> {
        self.declared_length
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn cells(&self) -> &[Option<String>] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn push(&mut self, cell: Option<String>) {
        self.cells.push(cell);
        self.max_value_length.take();
    }

    pub(crate) fn set(&mut self, row: usize, cell: Option<String>) {
        self.cells[row] = cell;
        self.max_value_length.take();
    }

    /// Declared length, or the type's default
    pub fn column_size(&self) -> usize {
        *self
            .size
            .get_or_init(|| self.declared_length.unwrap_or_else(|| self.sql_type.default_length()))
    }

    /// Longest value currently held, computed on first access
    pub fn max_value_length(&self) -> usize {
        *self.max_value_length.get_or_init(|| {
            self.cells
                .iter()
                .flatten()
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
    }

    /// Characters needed to display any value of this column
    pub fn display_size(&self) -> usize {
        self.column_size().max(self.max_value_length()).max(self.name.len())
    }
}

/// Ordered named columns of equal length. No columns means no result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<Column>,
}

impl ResultTable {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Table standing for a statement that produced no rows
    pub fn no_result() -> Self {
        Self::default()
    }

    /// Empty table with the given column names, all varchar
    pub fn with_names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| Column::new(*n, SqlType::Varchar)).collect())
    }

    pub fn is_no_result(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Find a column by `name` or `table.name`, case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let (table, bare) = match name.rsplit_once('.') {
            Some((table, bare)) => (Some(table), bare),
            None => (None, name),
        };
        self.columns.iter().position(|column| {
            column.name.eq_ignore_ascii_case(bare)
                && match (table, column.table()) {
                    (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                    (Some(_), None) => false,
                    (None, _) => true,
                }
        })
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Value at `row` of column `name`; `Ok(None)` is a null cell
    pub fn cell(&self, row: usize, name: &str) -> Result<Option<&str>> {
        let column = self.column_by_name(name).ok_or_else(|| Error::NoSuchCell {
            row,
            column: name.to_string(),
        })?;
        column
            .cells
            .get(row)
            .map(Option::as_deref)
            .ok_or_else(|| Error::NoSuchCell {
                row,
                column: name.to_string(),
            })
    }

    pub fn row(&self, row: usize) -> Option<Vec<Option<&str>>> {
        if row >= self.row_count() {
            return None;
        }
        Some(self.columns.iter().map(|c| c.cells[row].as_deref()).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Option<&str>>> + '_ {
        (0..self.row_count()).filter_map(move |i| self.row(i))
    }

    /// Append one row, one cell per column
    pub fn push_row(&mut self, cells: Vec<Option<String>>) -> Result<()> {
        if cells.len() != self.columns.len() {
            return Err(Error::parse(
                0,
                format!(
                    "row has {} cells but the table has {} columns",
                    cells.len(),
                    self.columns.len()
                ),
            ));
        }
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.push(cell);
        }
        Ok(())
    }

    /// Overwrite one row in place
    pub fn replace_row(&mut self, row: usize, cells: Vec<Option<String>>) -> Result<()> {
        if row >= self.row_count() || cells.len() != self.columns.len() {
            return Err(Error::NoSuchCell {
                row,
                column: String::new(),
            });
        }
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.set(row, cell);
        }
        Ok(())
    }

    /// The one base table every column was drawn from, if there is one
    pub fn single_source_table(&self) -> Option<&str> {
        let first = self.columns.first()?.table()?;
        self.columns
            .iter()
            .all(|c| c.table().is_some_and(|t| t.eq_ignore_ascii_case(first)))
            .then_some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tokens_map_to_types_and_lengths() {
        assert_eq!(SqlType::parse("varchar(20)"), (SqlType::Varchar, Some(20)));
        assert_eq!(SqlType::parse("string"), (SqlType::Varchar, None));
        assert_eq!(SqlType::parse("string(char(3))"), (SqlType::Char, Some(3)));
        assert_eq!(SqlType::parse("number(integer)"), (SqlType::Integer, None));
        assert_eq!(SqlType::parse("INT"), (SqlType::Integer, None));
        assert_eq!(SqlType::parse("real"), (SqlType::Float, None));
        assert_eq!(SqlType::parse("datetime(date)"), (SqlType::Date, None));
        assert_eq!(SqlType::parse("datetime"), (SqlType::Timestamp, None));
        assert_eq!(SqlType::parse("blob"), (SqlType::Unknown, None));
    }

    #[test]
    fn header_splits_table_and_column() {
        let column = Column::from_header("emp.name", "varchar(30)");
        assert_eq!(column.table(), Some("emp"));
        assert_eq!(column.name(), "name");
        assert_eq!(column.column_size(), 30);

        let bare = Column::from_header("total", "int");
        assert_eq!(bare.table(), None);
        assert_eq!(bare.column_size(), 11);
    }

    #[test]
    fn max_value_length_follows_pushes() {
        let mut column = Column::new("c", SqlType::Varchar);
        column.push(Some("ab".into()));
        assert_eq!(column.max_value_length(), 2);
        column.push(Some("abcde".into()));
        column.push(None);
        assert_eq!(column.max_value_length(), 5);
    }

    #[test]
    fn rows_cells_and_lookup() {
        let mut table = ResultTable::new(vec![
            Column::from_header("t.id", "integer"),
            Column::from_header("t.name", "varchar(10)"),
        ]);
        table.push_row(vec![Some("1".into()), Some("ann".into())]).unwrap();
        table.push_row(vec![Some("2".into()), None]).unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(0, "name").unwrap(), Some("ann"));
        assert_eq!(table.cell(1, "t.name").unwrap(), None);
        assert!(table.cell(2, "name").is_err());
        assert!(table.cell(0, "missing").is_err());
        assert_eq!(table.row(1), Some(vec![Some("2"), None]));
        assert_eq!(table.single_source_table(), Some("t"));
        assert!(table.push_row(vec![None]).is_err());
    }

    #[test]
    fn mixed_provenance_has_no_single_source() {
        let table = ResultTable::new(vec![
            Column::from_header("a.x", "int"),
            Column::from_header("b.y", "int"),
        ]);
        assert_eq!(table.single_source_table(), None);
        assert!(ResultTable::no_result().is_no_result());
        assert_eq!(ResultTable::no_result().row_count(), 0);
    }
}
