//! Command catalog repository: reads and writes `command`, `data_type`
//! and the `command_data_type` applicability table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw command row. Parameter groups are kept as their stored JSON text.
#[derive(Debug, Clone)]
pub struct CommandRow {
    pub command_id: i64,
    pub name: String,
    pub script: String,
    pub input: String,
    pub required: String,
    pub optional: String,
    pub output: String,
}

impl CommandRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            command_id: row.get("command_id")?,
            name: row.get("name")?,
            script: row.get("command")?,
            input: row.get("input")?,
            required: row.get("required")?,
            optional: row.get("optional")?,
            output: row.get("output")?,
        })
    }
}

const COMMAND_COLUMNS: &str = "c.command_id, c.name, c.command, c.input, c.required, c.optional, c.output";

/// Returns every command in definition order.
pub fn all(conn: &Connection) -> Result<Vec<CommandRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM command c ORDER BY c.command_id",
        COMMAND_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], CommandRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns every known datatype as `(data_type_id, name)`.
pub fn datatypes(conn: &Connection) -> Result<Vec<(i64, String)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT data_type_id, data_type FROM data_type ORDER BY data_type_id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Looks up a datatype id by name.
pub fn datatype_id(conn: &Connection, name: &str) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT data_type_id FROM data_type WHERE data_type = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Commands applicable to a datatype, in definition order.
pub fn for_datatype(conn: &Connection, data_type_id: i64) -> Result<Vec<CommandRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM command c
         JOIN command_data_type cd ON cd.command_id = c.command_id
         WHERE cd.data_type_id = ?1
         ORDER BY c.command_id",
        COMMAND_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![data_type_id], CommandRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Finds the command called `name` if it applies to the datatype.
pub fn find_applicable(
    conn: &Connection,
    data_type_id: i64,
    name: &str,
) -> Result<Option<CommandRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM command c
                 JOIN command_data_type cd ON cd.command_id = c.command_id
                 WHERE cd.data_type_id = ?1 AND c.name = ?2",
                COMMAND_COLUMNS
            ),
            params![data_type_id, name],
            CommandRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a command by id.
pub fn find_by_id(conn: &Connection, command_id: i64) -> Result<Option<CommandRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM command c WHERE c.command_id = ?1", COMMAND_COLUMNS),
            params![command_id],
            CommandRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns true if a command with this name exists.
pub fn name_exists(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM command WHERE name = ?1",
        params![name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Inserts a command and returns its id.
pub fn insert(
    conn: &Connection,
    name: &str,
    script: &str,
    groups: [&str; 4],
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO command (name, command, input, required, optional, output)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![name, script, groups[0], groups[1], groups[2], groups[3]],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Marks a command as applicable to a datatype.
pub fn link_datatype(conn: &Connection, command_id: i64, data_type_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO command_data_type (command_id, data_type_id) VALUES (?1, ?2)",
        params![command_id, data_type_id],
    )?;
    Ok(())
}
