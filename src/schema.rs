//! Parsing of schema dumps into per-relation catalog information.
//!
//! A dump is a sequence of relation blocks:
//!
//! ```text
//! $table            (or $view)
//! emp
//! id                column name / type pairs
//! int
//! dept
//! varchar(10)
//! $
//! [id,dept]         not-null columns
//! $
//! [id]              primary key
//! $
//! ...               check constraints (ignored)
//! $
//! emp.[dept] -> dept.[name]
//! $
//! ...               functional dependencies (ignored)
//! $
//! ...               integrity constraints (ignored)
//! $
//! $eot
//! ```
//!
//! Views may stop after their column block.

use std::collections::HashMap;

use crate::builder::ResponseLines;
use crate::constants::{TAPI_DELIMITER, TAPI_EOT, TAPI_ERROR, TAPI_TABLE, TAPI_VIEW};
use crate::error::{Error, Result};
use crate::table::SqlType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    View,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Table => "TABLE",
            RelationKind::View => "VIEW",
        }
    }
}

/// `local_column` of this relation references `referenced_table.referenced_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyEdge {
    pub local_column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Catalog facts about one relation
#[derive(Debug, Clone, PartialEq)]
pub struct DBSchemaRelationInfo {
    pub name: String,
    pub kind: RelationKind,
    /// Column names in declaration order
    pub columns: Vec<String>,
    pub column_index: HashMap<String, usize>,
    /// Raw type token per column
    pub column_types: HashMap<String, String>,
    pub not_null: Vec<String>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyEdge>,
}

impl DBSchemaRelationInfo {
    fn new(name: String, kind: RelationKind) -> Self {
        Self {
            name,
            kind,
            columns: Vec::new(),
            column_index: HashMap::new(),
            column_types: HashMap::new(),
            not_null: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    fn add_column(&mut self, name: String, type_token: String) {
        self.column_index.insert(name.clone(), self.columns.len());
        self.column_types.insert(name.clone(), type_token);
        self.columns.push(name);
    }

    pub fn is_view(&self) -> bool {
        self.kind == RelationKind::View
    }

    pub fn column_type(&self, column: &str) -> (SqlType, Option<usize>) {
        self.column_types
            .get(column)
            .map_or((SqlType::Unknown, None), |t| SqlType::parse(t))
    }

    pub fn type_token(&self, column: &str) -> Option<&str> {
        self.column_types.get(column).map(String::as_str)
    }

    pub fn is_nullable(&self, column: &str) -> bool {
        !self.not_null.iter().any(|c| c == column) && !self.primary_key.iter().any(|c| c == column)
    }
}

/// Parse a schema dump. An empty dump yields no relations.
pub fn parse_schema(raw: &str) -> Result<Vec<DBSchemaRelationInfo>> {
    let mut lines = ResponseLines::new(raw);
    let mut relations = Vec::new();

    loop {
        lines.skip_blank();
        let Some(marker) = lines.next() else { break };
        let marker = marker.trim();
        let kind = match marker {
            TAPI_TABLE => RelationKind::Table,
            TAPI_VIEW => RelationKind::View,
            TAPI_EOT => break,
            TAPI_ERROR => {
                let message: Vec<&str> = lines
                    .by_ref()
                    .map(str::trim)
                    .take_while(|l| *l != TAPI_EOT)
                    .collect();
                return Err(Error::Engine(message.join(" ")));
            }
            // Info lines and prompts around the dump
            _ if marker.starts_with("Info:") || marker.starts_with("DES>") => continue,
            other => {
                return Err(Error::parse(
                    lines.line_number(),
                    format!("expected $table or $view, found {:?}", other),
                ))
            }
        };

        let name = lines.expect("a relation name")?.trim().to_string();
        let mut relation = DBSchemaRelationInfo::new(name, kind);
        read_columns(&mut lines, &mut relation)?;

        let mut block = 0;
        while !at_relation_boundary(&mut lines) {
            let content = read_block(&mut lines);
            let line = lines.line_number();
            match block {
                0 => relation.not_null = parse_name_lists(&content, line)?,
                1 => relation.primary_key = parse_name_lists(&content, line)?,
                3 => {
                    for entry in &content {
                        relation.foreign_keys.extend(parse_foreign_key(entry, line)?);
                    }
                }
                // check constraints, functional dependencies, integrity constraints
                _ => {}
            }
            block += 1;
        }

        relations.push(relation);
    }

    Ok(relations)
}

fn read_columns(lines: &mut ResponseLines<'_>, relation: &mut DBSchemaRelationInfo) -> Result<()> {
    loop {
        let column = lines.expect("a column name or $")?.trim();
        if column == TAPI_DELIMITER {
            return Ok(());
        }
        if column == TAPI_EOT || column == TAPI_TABLE || column == TAPI_VIEW {
            return Err(Error::parse(
                lines.line_number(),
                format!("column list of {} is not terminated", relation.name),
            ));
        }
        let type_token = lines.expect("a column type")?.trim().to_string();
        let bare = column.rsplit_once('.').map_or(column, |(_, c)| c);
        relation.add_column(bare.to_string(), type_token);
    }
}

fn at_relation_boundary(lines: &mut ResponseLines<'_>) -> bool {
    match lines.peek().map(str::trim) {
        None => true,
        Some(line) => line == TAPI_TABLE || line == TAPI_VIEW || line == TAPI_EOT,
    }
}

// Lines up to and including the next `$`, or up to the next relation marker
fn read_block<'a>(lines: &mut ResponseLines<'a>) -> Vec<&'a str> {
    let mut content = Vec::new();
    while !at_relation_boundary(lines) {
        let Some(line) = lines.next() else { break };
        let line = line.trim();
        if line == TAPI_DELIMITER {
            break;
        }
        if !line.is_empty() {
            content.push(line);
        }
    }
    content
}

fn parse_name_lists(content: &[&str], line: usize) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in content {
        let mut parser = TokenParser::new(entry, line);
        let (_, columns) = parser.side()?;
        parser.skip_spaces();
        if !parser.at_end() {
            return Err(parser.error("trailing text after column list"));
        }
        names.extend(columns);
    }
    Ok(names)
}

/// Parse `local.[a,b] -> foreign.[x,y]` (brackets optional for one column)
pub fn parse_foreign_key(entry: &str, line: usize) -> Result<Vec<ForeignKeyEdge>> {
    let mut parser = TokenParser::new(entry, line);
    let (_, local) = parser.side()?;
    parser.skip_spaces();
    parser.arrow()?;
    parser.skip_spaces();
    let (referenced_table, referenced) = parser.side()?;
    parser.skip_spaces();
    if !parser.at_end() {
        return Err(parser.error("trailing text after foreign key"));
    }

    let referenced_table =
        referenced_table.ok_or_else(|| parser.error("referenced side has no table"))?;
    if local.len() != referenced.len() {
        return Err(parser.error("foreign key column counts differ"));
    }

    Ok(local
        .into_iter()
        .zip(referenced)
        .map(|(local_column, referenced_column)| ForeignKeyEdge {
            local_column,
            referenced_table: referenced_table.clone(),
            referenced_column,
        })
        .collect())
}

/// Character-level reader for the bracketed column-list grammar, which is
/// not whitespace delimited
struct TokenParser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl<'a> TokenParser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
            line,
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::parse(
            self.line,
            format!("{} at column {} of {:?}", message, self.pos + 1, self.text),
        )
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_spaces(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn is_name_char(c: char) -> bool {
        !(c.is_whitespace() || matches!(c, '.' | ',' | '[' | ']' | '-' | '>'))
    }

    fn name(&mut self) -> Result<String> {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(Self::is_name_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn expect_char(&mut self, wanted: char) -> Result<()> {
        self.skip_spaces();
        if self.peek() == Some(wanted) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", wanted)))
        }
    }

    fn arrow(&mut self) -> Result<()> {
        self.expect_char('-')?;
        if self.peek() == Some('>') {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error("expected '->'"))
        }
    }

    fn bracket_list(&mut self) -> Result<Vec<String>> {
        self.expect_char('[')?;
        let mut names = Vec::new();
        self.skip_spaces();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(names);
        }
        loop {
            names.push(self.name()?);
            self.skip_spaces();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(names);
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    /// `table.[a,b]`, `table.a`, `[a,b]` or `a`
    fn side(&mut self) -> Result<(Option<String>, Vec<String>)> {
        self.skip_spaces();
        if self.peek() == Some('[') {
            return Ok((None, self.bracket_list()?));
        }
        let first = self.name()?;
        if self.peek() != Some('.') {
            return Ok((None, vec![first]));
        }
        self.pos += 1;
        if self.peek() == Some('[') {
            Ok((Some(first), self.bracket_list()?))
        } else {
            Ok((Some(first), vec![self.name()?]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
$table
dept
name
varchar(10)
$
[name]
$
[name]
$
$
$
$
$
$table
emp
emp.id
int
emp.dept
varchar(10)
emp.salary
float
$
[id]
$
[id]
$
salary > 0
$
emp.[dept] -> dept.[name]
$
id -> salary
$
$
$view
rich
id
int
$
$eot
";

    #[test]
    fn relations_are_parsed_in_order() {
        let relations = parse_schema(DUMP).unwrap();
        let names: Vec<&str> = relations.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["dept", "emp", "rich"]);

        let emp = &relations[1];
        assert_eq!(emp.kind, RelationKind::Table);
        assert_eq!(emp.columns, vec!["id", "dept", "salary"]);
        assert_eq!(emp.column_index["salary"], 2);
        assert_eq!(emp.column_type("dept"), (SqlType::Varchar, Some(10)));
        assert_eq!(emp.primary_key, vec!["id"]);
        assert_eq!(emp.not_null, vec!["id"]);
        assert!(!emp.is_nullable("id"));
        assert!(emp.is_nullable("dept"));
        assert_eq!(
            emp.foreign_keys,
            vec![ForeignKeyEdge {
                local_column: "dept".into(),
                referenced_table: "dept".into(),
                referenced_column: "name".into(),
            }]
        );

        let view = &relations[2];
        assert!(view.is_view());
        assert!(view.primary_key.is_empty());
    }

    #[test]
    fn empty_dump_has_no_relations() {
        assert!(parse_schema("$eot\n").unwrap().is_empty());
        assert!(parse_schema("").unwrap().is_empty());
    }

    #[test]
    fn composite_foreign_key() {
        let edges = parse_foreign_key("r.[a, b]->s.[x,y]", 1).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].local_column, "b");
        assert_eq!(edges[1].referenced_table, "s");
        assert_eq!(edges[1].referenced_column, "y");
    }

    #[test]
    fn unbracketed_foreign_key() {
        let edges = parse_foreign_key("r.a -> s.x", 1).unwrap();
        assert_eq!(edges[0].local_column, "a");
        assert_eq!(edges[0].referenced_column, "x");
    }

    #[test]
    fn malformed_foreign_keys_are_rejected() {
        assert!(parse_foreign_key("r.[a,b] -> s.[x]", 4).is_err());
        assert!(parse_foreign_key("r.[a -> s.[x]", 4).is_err());
        assert!(parse_foreign_key("r.[a] => s.[x]", 4).is_err());
        assert!(parse_foreign_key("r.[a] -> [x]", 4).is_err());
    }

    #[test]
    fn engine_error_in_dump() {
        let err = parse_schema("$error\nUnknown relation.\n$eot\n").unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[test]
    fn unterminated_columns_are_a_parse_error() {
        let err = parse_schema("$table\nt\na\nint\n$eot\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
