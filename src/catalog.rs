//! Catalog functions.
//!
//! Each builder projects the fixed ODBC column set for its function from
//! parsed schema relations. Builders always return the full column set,
//! with zero rows when the engine knows no matching relation.

use crate::codec::CommandKind;
use crate::error::{Error, Result};
use crate::schema::{parse_schema, DBSchemaRelationInfo};
use crate::session::QueryRunner;
use crate::table::{Column, ResultTable, SqlType};

pub const TABLES_COLUMNS: &[&str] = &["TABLE_CAT", "TABLE_SCHEM", "TABLE_NAME", "TABLE_TYPE", "REMARKS"];

pub const COLUMNS_COLUMNS: &[&str] = &[
    "TABLE_CAT",
    "TABLE_SCHEM",
    "TABLE_NAME",
    "COLUMN_NAME",
    "DATA_TYPE",
    "TYPE_NAME",
    "COLUMN_SIZE",
    "BUFFER_LENGTH",
    "DECIMAL_DIGITS",
    "NUM_PREC_RADIX",
    "NULLABLE",
    "REMARKS",
    "COLUMN_DEF",
    "SQL_DATA_TYPE",
    "SQL_DATETIME_SUB",
    "CHAR_OCTET_LENGTH",
    "ORDINAL_POSITION",
    "IS_NULLABLE",
];

pub const PRIMARY_KEYS_COLUMNS: &[&str] = &[
    "TABLE_CAT",
    "TABLE_SCHEM",
    "TABLE_NAME",
    "COLUMN_NAME",
    "KEY_SEQ",
    "PK_NAME",
];

pub const FOREIGN_KEYS_COLUMNS: &[&str] = &[
    "PKTABLE_CAT",
    "PKTABLE_SCHEM",
    "PKTABLE_NAME",
    "PKCOLUMN_NAME",
    "FKTABLE_CAT",
    "FKTABLE_SCHEM",
    "FKTABLE_NAME",
    "FKCOLUMN_NAME",
    "KEY_SEQ",
    "UPDATE_RULE",
    "DELETE_RULE",
    "FK_NAME",
    "PK_NAME",
    "DEFERRABILITY",
];

pub const STATISTICS_COLUMNS: &[&str] = &[
    "TABLE_CAT",
    "TABLE_SCHEM",
    "TABLE_NAME",
    "NON_UNIQUE",
    "INDEX_QUALIFIER",
    "INDEX_NAME",
    "TYPE",
    "ORDINAL_POSITION",
    "COLUMN_NAME",
    "ASC_OR_DESC",
    "CARDINALITY",
    "PAGES",
    "FILTER_CONDITION",
];

pub const SPECIAL_COLUMNS_COLUMNS: &[&str] = &[
    "SCOPE",
    "COLUMN_NAME",
    "DATA_TYPE",
    "TYPE_NAME",
    "COLUMN_SIZE",
    "BUFFER_LENGTH",
    "DECIMAL_DIGITS",
    "PSEUDO_COLUMN",
];

pub const TYPE_INFO_COLUMNS: &[&str] = &[
    "TYPE_NAME",
    "DATA_TYPE",
    "COLUMN_SIZE",
    "LITERAL_PREFIX",
    "LITERAL_SUFFIX",
    "CREATE_PARAMS",
    "NULLABLE",
    "CASE_SENSITIVE",
    "SEARCHABLE",
    "UNSIGNED_ATTRIBUTE",
    "FIXED_PREC_SCALE",
    "AUTO_UNIQUE_VALUE",
    "LOCAL_TYPE_NAME",
    "MINIMUM_SCALE",
    "MAXIMUM_SCALE",
    "SQL_DATA_TYPE",
    "SQL_DATETIME_SUB",
    "NUM_PREC_RADIX",
    "INTERVAL_PRECISION",
];

pub const CATALOGS_COLUMNS: &[&str] = &["TABLE_CAT", "TABLE_SCHEM", "TABLE_NAME", "TABLE_TYPE", "REMARKS"];

// ODBC constants used in catalog rows
const SQL_NO_NULLS: i64 = 0;
const SQL_NULLABLE: i64 = 1;
const SQL_SEARCHABLE: i64 = 3;
const SQL_NO_ACTION: i64 = 3;
const SQL_NOT_DEFERRABLE: i64 = 7;
const SQL_TABLE_STAT: i64 = 0;
const SQL_INDEX_OTHER: i64 = 3;
const SQL_SCOPE_SESSION: i64 = 2;
const SQL_PC_NOT_PSEUDO: i64 = 1;

const INTEGER_COLUMNS: &[&str] = &[
    "DATA_TYPE",
    "COLUMN_SIZE",
    "BUFFER_LENGTH",
    "DECIMAL_DIGITS",
    "NUM_PREC_RADIX",
    "NULLABLE",
    "SQL_DATA_TYPE",
    "SQL_DATETIME_SUB",
    "CHAR_OCTET_LENGTH",
    "ORDINAL_POSITION",
    "KEY_SEQ",
    "UPDATE_RULE",
    "DELETE_RULE",
    "DEFERRABILITY",
    "NON_UNIQUE",
    "TYPE",
    "CARDINALITY",
    "PAGES",
    "SCOPE",
    "PSEUDO_COLUMN",
    "CASE_SENSITIVE",
    "SEARCHABLE",
    "UNSIGNED_ATTRIBUTE",
    "FIXED_PREC_SCALE",
    "AUTO_UNIQUE_VALUE",
    "MINIMUM_SCALE",
    "MAXIMUM_SCALE",
    "INTERVAL_PRECISION",
];

/// Empty table with a catalog function's column set
pub fn empty_table(names: &[&str]) -> ResultTable {
    ResultTable::new(
        names
            .iter()
            .map(|name| {
                let sql_type = if INTEGER_COLUMNS.contains(name) {
                    SqlType::Integer
                } else {
                    SqlType::Varchar
                };
                Column::new(*name, sql_type)
            })
            .collect(),
    )
}

fn text(value: impl Into<String>) -> Option<String> {
    Some(value.into())
}

fn int(value: impl Into<i64>) -> Option<String> {
    Some(value.into().to_string())
}

/// ODBC search pattern match: `%` any run, `_` any one character
pub fn like(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    // Last `%` seen and the value position it currently absorbs up to
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        match p.get(pi) {
            Some('%') => {
                while p.get(pi) == Some(&'%') {
                    pi += 1;
                }
                star = Some((pi, vi));
            }
            Some(c) if *c == '_' || c.eq_ignore_ascii_case(&v[vi]) => {
                pi += 1;
                vi += 1;
            }
            _ => match star {
                Some((after, absorbed)) => {
                    pi = after;
                    vi = absorbed + 1;
                    star = Some((after, absorbed + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}

pub fn tables_table(
    relations: &[DBSchemaRelationInfo],
    catalog: Option<&str>,
    name_pattern: Option<&str>,
) -> Result<ResultTable> {
    let mut table = empty_table(TABLES_COLUMNS);
    for relation in relations {
        if name_pattern.is_some_and(|p| !like(p, &relation.name)) {
            continue;
        }
        table.push_row(vec![
            catalog.map(str::to_string),
            None,
            text(&relation.name),
            text(relation.kind.as_str()),
            None,
        ])?;
    }
    Ok(table)
}

pub fn columns_table(relations: &[DBSchemaRelationInfo]) -> Result<ResultTable> {
    columns_table_filtered(relations, None, None)
}

pub fn columns_table_filtered(
    relations: &[DBSchemaRelationInfo],
    catalog: Option<&str>,
    column_pattern: Option<&str>,
) -> Result<ResultTable> {
    let mut table = empty_table(COLUMNS_COLUMNS);
    for relation in relations {
        for (position, name) in relation.columns.iter().enumerate() {
            if column_pattern.is_some_and(|p| !like(p, name)) {
                continue;
            }
            let (sql_type, length) = relation.column_type(name);
            let size = length.unwrap_or_else(|| sql_type.default_length());
            let nullable = relation.is_nullable(name);
            table.push_row(vec![
                catalog.map(str::to_string),
                None,
                text(&relation.name),
                text(name),
                int(sql_type.odbc_code()),
                text(relation.type_token(name).unwrap_or(sql_type.name())),
                int(size as i64),
                int(size as i64),
                None,
                if sql_type.is_numeric() { int(10) } else { None },
                int(if nullable { SQL_NULLABLE } else { SQL_NO_NULLS }),
                None,
                None,
                int(sql_type.odbc_code()),
                None,
                if sql_type.is_character() { int(size as i64) } else { None },
                int(position as i64 + 1),
                text(if nullable { "YES" } else { "NO" }),
            ])?;
        }
    }
    Ok(table)
}

pub fn primary_keys_table(relation: Option<&DBSchemaRelationInfo>, catalog: Option<&str>) -> Result<ResultTable> {
    let mut table = empty_table(PRIMARY_KEYS_COLUMNS);
    let Some(relation) = relation else {
        return Ok(table);
    };
    for (seq, column) in relation.primary_key.iter().enumerate() {
        table.push_row(vec![
            catalog.map(str::to_string),
            None,
            text(&relation.name),
            text(column),
            int(seq as i64 + 1),
            None,
        ])?;
    }
    Ok(table)
}

/// Foreign keys referencing `pk_table` and/or declared by `fk_table`
pub fn foreign_keys_table(
    relations: &[DBSchemaRelationInfo],
    pk_table: Option<&str>,
    fk_table: Option<&str>,
    catalog: Option<&str>,
) -> Result<ResultTable> {
    let mut table = empty_table(FOREIGN_KEYS_COLUMNS);
    for relation in relations {
        if fk_table.is_some_and(|t| !t.eq_ignore_ascii_case(&relation.name)) {
            continue;
        }
        let mut seq_by_target: Vec<(&str, i64)> = Vec::new();
        for edge in &relation.foreign_keys {
            if pk_table.is_some_and(|t| !t.eq_ignore_ascii_case(&edge.referenced_table)) {
                continue;
            }
            let seq = match seq_by_target
                .iter_mut()
                .find(|(target, _)| *target == edge.referenced_table)
            {
                Some((_, seq)) => {
                    *seq += 1;
                    *seq
                }
                None => {
                    seq_by_target.push((edge.referenced_table.as_str(), 1));
                    1
                }
            };
            table.push_row(vec![
                catalog.map(str::to_string),
                None,
                text(&edge.referenced_table),
                text(&edge.referenced_column),
                catalog.map(str::to_string),
                None,
                text(&relation.name),
                text(&edge.local_column),
                int(seq),
                int(SQL_NO_ACTION),
                int(SQL_NO_ACTION),
                None,
                None,
                int(SQL_NOT_DEFERRABLE),
            ])?;
        }
    }
    Ok(table)
}

/// Table statistics row followed by the primary key, the only unique
/// index the engine declares
pub fn statistics_table(
    relation: Option<&DBSchemaRelationInfo>,
    cardinality: Option<u64>,
    catalog: Option<&str>,
) -> Result<ResultTable> {
    let mut table = empty_table(STATISTICS_COLUMNS);
    let Some(relation) = relation else {
        return Ok(table);
    };
    table.push_row(vec![
        catalog.map(str::to_string),
        None,
        text(&relation.name),
        None,
        None,
        None,
        int(SQL_TABLE_STAT),
        None,
        None,
        None,
        cardinality.map(|c| c.to_string()),
        None,
        None,
    ])?;
    for (position, column) in relation.primary_key.iter().enumerate() {
        table.push_row(vec![
            catalog.map(str::to_string),
            None,
            text(&relation.name),
            int(0),
            None,
            text(format!("{}_pk", relation.name)),
            int(SQL_INDEX_OTHER),
            int(position as i64 + 1),
            text(column),
            text("A"),
            cardinality.map(|c| c.to_string()),
            None,
            None,
        ])?;
    }
    Ok(table)
}

/// Best row identifier: the primary key when declared, otherwise every
/// column of the probed table
pub fn special_columns_table(probe: &ResultTable, relation: Option<&DBSchemaRelationInfo>) -> Result<ResultTable> {
    let mut table = empty_table(SPECIAL_COLUMNS_COLUMNS);
    let key: Option<&[String]> = relation
        .map(|r| r.primary_key.as_slice())
        .filter(|pk| !pk.is_empty());

    for column in probe.columns() {
        if key.is_some_and(|pk| !pk.iter().any(|c| c.eq_ignore_ascii_case(column.name()))) {
            continue;
        }
        let sql_type = column.sql_type();
        table.push_row(vec![
            int(SQL_SCOPE_SESSION),
            text(column.name()),
            int(sql_type.odbc_code()),
            text(sql_type.name()),
            int(column.column_size() as i64),
            int(column.column_size() as i64),
            None,
            int(SQL_PC_NOT_PSEUDO),
        ])?;
    }
    Ok(table)
}

pub fn type_info_table(only: Option<SqlType>) -> Result<ResultTable> {
    let mut table = empty_table(TYPE_INFO_COLUMNS);
    let types = [
        SqlType::Char,
        SqlType::Integer,
        SqlType::Float,
        SqlType::Varchar,
        SqlType::Date,
        SqlType::Time,
        SqlType::Timestamp,
    ];
    for sql_type in types.into_iter().filter(|t| only.map_or(true, |o| o == *t)) {
        let quoted = sql_type.is_character();
        table.push_row(vec![
            text(sql_type.name()),
            int(sql_type.odbc_code()),
            int(sql_type.default_length() as i64),
            quoted.then(|| "'".to_string()),
            quoted.then(|| "'".to_string()),
            quoted.then(|| "length".to_string()),
            int(SQL_NULLABLE),
            int(i64::from(quoted)),
            int(SQL_SEARCHABLE),
            if sql_type.is_numeric() { int(0) } else { None },
            int(0),
            if sql_type.is_numeric() { int(0) } else { None },
            text(sql_type.name()),
            None,
            None,
            int(sql_type.odbc_code()),
            None,
            if sql_type.is_numeric() { int(10) } else { None },
            None,
        ])?;
    }
    Ok(table)
}

pub fn catalogs_table(databases: &[String]) -> Result<ResultTable> {
    let mut table = empty_table(CATALOGS_COLUMNS);
    for name in databases {
        table.push_row(vec![text(name), None, None, None, None])?;
    }
    Ok(table)
}

/// Catalog functions answered by querying the engine
pub struct Catalog<'a, R: QueryRunner + ?Sized> {
    runner: &'a R,
    catalog: Option<String>,
}

impl<'a, R: QueryRunner + ?Sized> Catalog<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self {
            runner,
            catalog: None,
        }
    }

    /// Report `name` as TABLE_CAT in every row
    pub fn with_catalog(mut self, name: impl Into<String>) -> Self {
        self.catalog = Some(name.into());
        self
    }

    /// Parsed schema of one relation, or of every relation
    pub fn relations(&self, name: Option<&str>) -> Result<Vec<DBSchemaRelationInfo>> {
        let raw = self.runner.run_raw(CommandKind::Schema, name.unwrap_or(""))?;
        parse_schema(&raw)
    }

    fn relation(&self, name: &str) -> Result<Option<DBSchemaRelationInfo>> {
        Ok(self
            .relations(Some(name))?
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name)))
    }

    pub fn tables(&self, name_pattern: Option<&str>) -> Result<ResultTable> {
        let relations = self.relations(None)?;
        tables_table(&relations, self.catalog.as_deref(), name_pattern)
    }

    pub fn columns(&self, table_pattern: Option<&str>, column_pattern: Option<&str>) -> Result<ResultTable> {
        let relations: Vec<_> = self
            .relations(None)?
            .into_iter()
            .filter(|r| table_pattern.map_or(true, |p| like(p, &r.name)))
            .collect();
        columns_table_filtered(&relations, self.catalog.as_deref(), column_pattern)
    }

    pub fn primary_keys(&self, table: &str) -> Result<ResultTable> {
        let relation = self.relation(table)?;
        primary_keys_table(relation.as_ref(), self.catalog.as_deref())
    }

    pub fn foreign_keys(&self, pk_table: Option<&str>, fk_table: Option<&str>) -> Result<ResultTable> {
        let relations = match fk_table {
            Some(name) => self.relation(name)?.into_iter().collect(),
            None => self.relations(None)?,
        };
        foreign_keys_table(&relations, pk_table, fk_table, self.catalog.as_deref())
    }

    pub fn statistics(&self, table: &str) -> Result<ResultTable> {
        let relation = self.relation(table)?;
        let cardinality = match &relation {
            Some(r) if !r.is_view() => Some(count_rows(self.runner, &r.name)?),
            _ => None,
        };
        statistics_table(relation.as_ref(), cardinality, self.catalog.as_deref())
    }

    pub fn special_columns(&self, table: &str) -> Result<ResultTable> {
        let relation = self.relation(table)?;
        if relation.is_none() {
            return Ok(empty_table(SPECIAL_COLUMNS_COLUMNS));
        }
        let probe = probe_columns(self.runner, table)?;
        special_columns_table(&probe, relation.as_ref())
    }

    pub fn type_info(&self, only: Option<SqlType>) -> Result<ResultTable> {
        type_info_table(only)
    }

    pub fn catalogs(&self) -> Result<ResultTable> {
        let raw = self
            .runner
            .run_raw(CommandKind::Plain, crate::constants::SHOW_DBS_COMMAND)?;
        catalogs_table(&plain_names(&raw))
    }
}

/// Zero-row query that reveals a table's full column order and types
pub fn probe_columns<R: QueryRunner + ?Sized>(runner: &R, table: &str) -> Result<ResultTable> {
    let query = format!("select * from {} limit 0", table);
    let probe = runner.execute(CommandKind::Query, &query)?.into_table();
    if probe.is_no_result() {
        return Err(Error::parse(0, format!("column probe of {} returned no columns", table)));
    }
    Ok(probe)
}

/// `select count(*)` as a number
pub fn count_rows<R: QueryRunner + ?Sized>(runner: &R, table: &str) -> Result<u64> {
    count_where(runner, table, None)
}

pub fn count_where<R: QueryRunner + ?Sized>(runner: &R, table: &str, clause: Option<&str>) -> Result<u64> {
    let query = match clause {
        Some(clause) => format!("select count(*) from {} where {}", table, clause),
        None => format!("select count(*) from {}", table),
    };
    let result = runner.execute(CommandKind::Query, &query)?.into_table();
    let value = result
        .column(0)
        .and_then(|c| c.cells().first().cloned().flatten())
        .ok_or_else(|| Error::parse(0, format!("count over {} returned no value", table)))?;
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::parse(0, format!("count over {} returned {:?}", table, value)))
}

/// Names printed one per line by plain session commands, without info
/// lines and prompts
pub(crate) fn plain_names(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Info:") && !l.starts_with("DES>") && *l != "$eot")
        .map(|l| crate::builder::unquote(l))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;
    use crate::session::tests::FakeRunner;

    const DUMP: &str = "$table\ndept\nname\nvarchar(10)\n$\n[name]\n$\n[name]\n$\n$\n$\n$\n$\n\
$table\nemp\nid\nint\ndept\nvarchar(10)\n$\n[id]\n$\n[id]\n$\n$\nemp.[dept] -> dept.[name]\n$\n$\n$\n\
$view\nv\nid\nint\n$\n$eot\n";

    #[test]
    fn like_patterns() {
        assert!(like("emp%", "employee"));
        assert!(like("e_p", "EMP"));
        assert!(like("%", ""));
        assert!(!like("e_p", "emmp"));
        assert!(like("%mp%e", "employee"));
        assert!(!like("emp", "employee"));
        assert!(!like("_", ""));
    }

    #[test]
    fn like_with_many_wildcards() {
        let name = "a".repeat(40);
        assert!(!like("%%%%%%%%%%x", &name));
        assert!(!like("%a%a%a%a%a%a%a%a%a%a%x", &name));
        assert!(like("%a%a%a%a%a%a%a%a%a%a%", &name));
    }

    #[test]
    fn empty_relations_keep_column_sets() {
        for (table, names) in [
            (tables_table(&[], None, None).unwrap(), TABLES_COLUMNS),
            (columns_table(&[]).unwrap(), COLUMNS_COLUMNS),
            (primary_keys_table(None, None).unwrap(), PRIMARY_KEYS_COLUMNS),
            (foreign_keys_table(&[], None, None, None).unwrap(), FOREIGN_KEYS_COLUMNS),
            (statistics_table(None, None, None).unwrap(), STATISTICS_COLUMNS),
            (special_columns_table(&ResultTable::no_result(), None).unwrap(), SPECIAL_COLUMNS_COLUMNS),
            (catalogs_table(&[]).unwrap(), CATALOGS_COLUMNS),
        ] {
            assert_eq!(table.column_names(), names.to_vec());
            assert_eq!(table.row_count(), 0);
        }
        assert_eq!(type_info_table(None).unwrap().columns().len(), TYPE_INFO_COLUMNS.len());
    }

    #[test]
    fn tables_and_columns_from_dump() {
        let relations = parse_schema(DUMP).unwrap();

        let tables = tables_table(&relations, Some("db1"), Some("e%")).unwrap();
        assert_eq!(tables.row_count(), 1);
        assert_eq!(tables.cell(0, "TABLE_NAME").unwrap(), Some("emp"));
        assert_eq!(tables.cell(0, "TABLE_CAT").unwrap(), Some("db1"));

        let all = tables_table(&relations, None, None).unwrap();
        assert_eq!(all.cell(2, "TABLE_TYPE").unwrap(), Some("VIEW"));

        let columns = columns_table(&relations).unwrap();
        assert_eq!(columns.row_count(), 4);
        assert_eq!(columns.cell(1, "COLUMN_NAME").unwrap(), Some("id"));
        assert_eq!(columns.cell(1, "IS_NULLABLE").unwrap(), Some("NO"));
        assert_eq!(columns.cell(2, "COLUMN_SIZE").unwrap(), Some("10"));
        assert_eq!(columns.cell(2, "ORDINAL_POSITION").unwrap(), Some("2"));
    }

    #[test]
    fn keys_from_dump() {
        let relations = parse_schema(DUMP).unwrap();
        let pk = primary_keys_table(relations.iter().find(|r| r.name == "emp"), None).unwrap();
        assert_eq!(pk.row_count(), 1);
        assert_eq!(pk.cell(0, "KEY_SEQ").unwrap(), Some("1"));

        let fk = foreign_keys_table(&relations, Some("dept"), None, None).unwrap();
        assert_eq!(fk.row_count(), 1);
        assert_eq!(fk.cell(0, "PKTABLE_NAME").unwrap(), Some("dept"));
        assert_eq!(fk.cell(0, "PKCOLUMN_NAME").unwrap(), Some("name"));
        assert_eq!(fk.cell(0, "FKTABLE_NAME").unwrap(), Some("emp"));
        assert_eq!(fk.cell(0, "FKCOLUMN_NAME").unwrap(), Some("dept"));

        assert_eq!(foreign_keys_table(&relations, Some("emp"), None, None).unwrap().row_count(), 0);
    }

    #[test]
    fn catalog_queries_through_runner() {
        let runner = FakeRunner::new();
        runner.respond("/tapi /dbschema emp", DUMP);
        runner.respond(
            "/tapi select * from emp limit 0",
            "answer\nemp.id\nint\nemp.dept\nvarchar(10)\n$\n$eot\n",
        );
        runner.respond("/tapi select count(*) from emp", "answer\ncount\nint\n$\n5\n$\n$eot\n");

        let catalog = Catalog::new(&runner);
        let special = catalog.special_columns("emp").unwrap();
        assert_eq!(special.row_count(), 1);
        assert_eq!(special.cell(0, "COLUMN_NAME").unwrap(), Some("id"));

        let stats = catalog.statistics("emp").unwrap();
        assert_eq!(stats.row_count(), 2);
        assert_eq!(stats.cell(0, "CARDINALITY").unwrap(), Some("5"));
        assert_eq!(stats.cell(1, "COLUMN_NAME").unwrap(), Some("id"));

        let missing = catalog.primary_keys("nothing").unwrap();
        assert_eq!(missing.column_names(), PRIMARY_KEYS_COLUMNS.to_vec());
        assert_eq!(missing.row_count(), 0);
    }

    #[test]
    fn catalogs_from_show_dbs() {
        let runner = FakeRunner::new();
        runner.respond("/show_dbs", "$des\nsales\nInfo: 2 databases.\n");
        let table = Catalog::new(&runner).catalogs().unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(1, "TABLE_CAT").unwrap(), Some("sales"));
    }
}
