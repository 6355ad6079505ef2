//! Command catalog: the computational commands jobs can run and the
//! datatypes each one applies to.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::command_repo::{self, CommandRow};
use crate::error::{LedgerError, Result};
use crate::job::options::OptionValue;

/// Parameter name to default value. `OptionValue::Null` means "no default".
pub type ParameterGroup = BTreeMap<String, OptionValue>;

/// Which group a parameter is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Input,
    Required,
    Optional,
    Output,
}

/// A computational command. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    /// Script or executable invoked by the worker.
    pub script: String,
    pub input: ParameterGroup,
    pub required: ParameterGroup,
    pub optional: ParameterGroup,
    pub output: ParameterGroup,
}

impl Command {
    /// Builds a command from the JSON text of its four parameter groups.
    pub fn new(
        name: &str,
        script: &str,
        input: &str,
        required: &str,
        optional: &str,
        output: &str,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            script: script.to_string(),
            input: parse_group(name, "input", input)?,
            required: parse_group(name, "required", required)?,
            optional: parse_group(name, "optional", optional)?,
            output: parse_group(name, "output", output)?,
        })
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    /// Finds the group a parameter is declared in, and its default.
    pub fn parameter(&self, key: &str) -> Option<(ParameterKind, &OptionValue)> {
        self.groups()
            .into_iter()
            .find_map(|(kind, group)| group.get(key).map(|default| (kind, default)))
    }

    pub fn declares(&self, key: &str) -> bool {
        self.parameter(key).is_some()
    }

    pub(crate) fn groups(&self) -> [(ParameterKind, &ParameterGroup); 4] {
        [
            (ParameterKind::Input, &self.input),
            (ParameterKind::Required, &self.required),
            (ParameterKind::Optional, &self.optional),
            (ParameterKind::Output, &self.output),
        ]
    }

    fn group_json(&self) -> Result<[String; 4]> {
        let encode = |group: &ParameterGroup| {
            serde_json::to_string(group).map_err(|e| LedgerError::InvalidCommand {
                name: self.name.clone(),
                reason: e.to_string(),
            })
        };
        Ok([
            encode(&self.input)?,
            encode(&self.required)?,
            encode(&self.optional)?,
            encode(&self.output)?,
        ])
    }
}

fn parse_group(command: &str, group: &str, json: &str) -> Result<ParameterGroup> {
    serde_json::from_str(json).map_err(|e| LedgerError::InvalidCommand {
        name: command.to_string(),
        reason: format!("{} parameters: {}", group, e),
    })
}

impl TryFrom<CommandRow> for Command {
    type Error = LedgerError;

    fn try_from(row: CommandRow) -> Result<Self> {
        Command::new(
            &row.name,
            &row.script,
            &row.input,
            &row.required,
            &row.optional,
            &row.output,
        )
    }
}

/// A command resolved for a specific datatype, with the row ids a job
/// references.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub command_id: i64,
    pub data_type_id: i64,
    pub command: Command,
}

/// All commands in definition order.
pub fn get_commands(conn: &Connection) -> Result<Vec<Command>> {
    command_repo::all(conn)?
        .into_iter()
        .map(Command::try_from)
        .collect()
}

/// Applicable commands per datatype. `None` means every known datatype.
pub fn get_commands_by_datatype(
    conn: &Connection,
    datatypes: Option<&[&str]>,
) -> Result<BTreeMap<String, Vec<Command>>> {
    let selected: Vec<(i64, String)> = match datatypes {
        None => command_repo::datatypes(conn)?,
        Some(names) => names
            .iter()
            .map(|name| {
                command_repo::datatype_id(conn, name)?
                    .map(|id| (id, name.to_string()))
                    .ok_or_else(|| LedgerError::UnknownDatatype(name.to_string()))
            })
            .collect::<Result<_>>()?,
    };

    let mut by_datatype = BTreeMap::new();
    for (id, name) in selected {
        let commands = command_repo::for_datatype(conn, id)?
            .into_iter()
            .map(Command::try_from)
            .collect::<Result<Vec<_>>>()?;
        by_datatype.insert(name, commands);
    }
    Ok(by_datatype)
}

/// Resolves `(datatype, command name)` to the command a job would run.
pub fn resolve(conn: &Connection, datatype: &str, command_name: &str) -> Result<ResolvedCommand> {
    let data_type_id = command_repo::datatype_id(conn, datatype)?
        .ok_or_else(|| LedgerError::UnknownDatatype(datatype.to_string()))?;
    let row = command_repo::find_applicable(conn, data_type_id, command_name)?.ok_or_else(|| {
        LedgerError::UnknownCommand {
            datatype: datatype.to_string(),
            command: command_name.to_string(),
        }
    })?;
    Ok(ResolvedCommand {
        command_id: row.command_id,
        data_type_id,
        command: Command::try_from(row)?,
    })
}

/// Like [`resolve`] but returns `None` instead of a lookup error.
pub fn try_resolve(
    conn: &Connection,
    datatype: &str,
    command_name: &str,
) -> Result<Option<ResolvedCommand>> {
    match resolve(conn, datatype, command_name) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(LedgerError::UnknownDatatype(_)) | Err(LedgerError::UnknownCommand { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Adds a command to the catalog and marks it applicable to `datatypes`.
pub fn register_command(conn: &Connection, command: &Command, datatypes: &[&str]) -> Result<i64> {
    if command_repo::name_exists(conn, &command.name)? {
        return Err(LedgerError::DuplicateCommand(command.name.clone()));
    }
    let data_type_ids = datatypes
        .iter()
        .map(|name| {
            command_repo::datatype_id(conn, name)?
                .ok_or_else(|| LedgerError::UnknownDatatype(name.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let [input, required, optional, output] = command.group_json()?;
    let command_id = command_repo::insert(
        conn,
        &command.name,
        &command.script,
        [&input, &required, &optional, &output],
    )?;
    for data_type_id in data_type_ids {
        command_repo::link_datatype(conn, command_id, data_type_id)?;
    }

    log::info!(
        "Registered command '{}' ({}) for {:?}",
        command.name,
        command.script,
        datatypes
    );
    Ok(command_id)
}
