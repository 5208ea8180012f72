//! Purpose: The closed set of single-record commands and their per-verb result handling.
//! Exports: `Command`, `CommandOutput`.
//! Role: One tagged variant per verb sharing one encode path (`Framer`) and one decode pass.
//! Invariants: `is_write()` decides timeout doubt; reads are never in doubt.
//! Invariants: Exists/Delete collapse the outcome to a flag; no partial record escapes an error.

use crate::core::decoder::{self, DecodeOptions, MessageHeader, UDF_SUCCESS_BIN};
use crate::core::error::Error;
use crate::core::policy::{BasePolicy, ReadPolicy, WritePolicy};
use crate::core::record::{Bin, Key, Operation, OperationType, Record, Value, has_write};
use crate::core::result_code;
use crate::core::transport::CallKind;

#[derive(Clone, Debug)]
pub enum Command<'a> {
    Get {
        policy: &'a ReadPolicy,
        key: &'a Key,
        bins: Option<&'a [String]>,
    },
    GetHeader {
        policy: &'a ReadPolicy,
        key: &'a Key,
    },
    Exists {
        policy: &'a ReadPolicy,
        key: &'a Key,
    },
    /// Put, add, append, or prepend; `op_type` picks which.
    Write {
        policy: &'a WritePolicy,
        key: &'a Key,
        op_type: OperationType,
        bins: &'a [Bin],
    },
    Delete {
        policy: &'a WritePolicy,
        key: &'a Key,
    },
    Touch {
        policy: &'a WritePolicy,
        key: &'a Key,
    },
    Operate {
        policy: &'a WritePolicy,
        key: &'a Key,
        ops: &'a [Operation],
    },
    Execute {
        policy: &'a WritePolicy,
        key: &'a Key,
        package: &'a str,
        function: &'a str,
        args: &'a [Value],
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutput {
    Record(Option<Record>),
    Flag(bool),
    Done,
    UdfResult(Option<Value>),
}

impl Command<'_> {
    pub fn kind(&self) -> CallKind {
        match self {
            Command::Get { .. } => CallKind::Read,
            Command::GetHeader { .. } => CallKind::GetHeader,
            Command::Exists { .. } => CallKind::Exists,
            Command::Write { .. } => CallKind::Write,
            Command::Delete { .. } => CallKind::Delete,
            Command::Touch { .. } => CallKind::Touch,
            Command::Operate { .. } => CallKind::Operate,
            Command::Execute { .. } => CallKind::Execute,
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Command::Get { key, .. }
            | Command::GetHeader { key, .. }
            | Command::Exists { key, .. }
            | Command::Write { key, .. }
            | Command::Delete { key, .. }
            | Command::Touch { key, .. }
            | Command::Operate { key, .. }
            | Command::Execute { key, .. } => key,
        }
    }

    pub fn is_write(&self) -> bool {
        match self {
            Command::Get { .. } | Command::GetHeader { .. } | Command::Exists { .. } => false,
            Command::Operate { ops, .. } => has_write(ops),
            Command::Write { .. }
            | Command::Delete { .. }
            | Command::Touch { .. }
            | Command::Execute { .. } => true,
        }
    }

    pub fn base_policy(&self) -> &BasePolicy {
        match self {
            Command::Get { policy, .. }
            | Command::GetHeader { policy, .. }
            | Command::Exists { policy, .. } => &policy.base,
            Command::Write { policy, .. }
            | Command::Delete { policy, .. }
            | Command::Touch { policy, .. }
            | Command::Operate { policy, .. }
            | Command::Execute { policy, .. } => &policy.base,
        }
    }

    fn decode_options(&self) -> DecodeOptions {
        let fail_on_filtered_out = self.base_policy().fail_on_filtered_out;
        if self.is_write() {
            DecodeOptions::write(fail_on_filtered_out)
        } else {
            DecodeOptions::read(fail_on_filtered_out)
        }
    }

    /// Interprets one decoded response message for this verb.
    pub fn decode(&self, header: &MessageHeader, record: Record) -> Result<CommandOutput, Error> {
        let code = header.result_code;
        let fail_on_filtered_out = self.base_policy().fail_on_filtered_out;
        match self {
            Command::Exists { .. } | Command::Delete { .. } => match code {
                result_code::OK => Ok(CommandOutput::Flag(true)),
                result_code::KEY_NOT_FOUND => Ok(CommandOutput::Flag(false)),
                result_code::FILTERED_OUT if !fail_on_filtered_out => Ok(CommandOutput::Flag(true)),
                code => Err(Error::from_result_code(code)),
            },
            Command::Write { .. } | Command::Touch { .. } => {
                decoder::resolve_record(header, record, self.decode_options())?;
                Ok(CommandOutput::Done)
            }
            Command::Execute { .. } => {
                let record = decoder::resolve_record(header, record, self.decode_options())?;
                Ok(CommandOutput::UdfResult(
                    record.and_then(|record| record.bins.get(UDF_SUCCESS_BIN).cloned()),
                ))
            }
            Command::Get { .. } | Command::GetHeader { .. } | Command::Operate { .. } => {
                decoder::resolve_record(header, record, self.decode_options())
                    .map(CommandOutput::Record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, CommandOutput};
    use crate::core::decoder::{RecordCursor, parse_message};
    use crate::core::error::ErrorKind;
    use crate::core::fixtures::{self, Row};
    use crate::core::policy::{ReadPolicy, WritePolicy};
    use crate::core::record::{Bin, Key, Operation, Value};
    use crate::core::result_code;
    use bytes::Bytes;

    fn decode(command: &Command<'_>, row: Row) -> Result<CommandOutput, crate::core::error::Error> {
        let message = fixtures::message(row);
        let mut cursor = RecordCursor::new(Bytes::from(message).slice(8..));
        let (header, record) = parse_message(&mut cursor).expect("parse");
        command.decode(&header, record)
    }

    #[test]
    fn write_flag_follows_verb() {
        let read = ReadPolicy::default();
        let write = WritePolicy::default();
        let key = Key::new("test", "demo", 1i64);
        let reads = [Operation::get("a")];
        let writes = [Operation::get("a"), Operation::touch()];
        let cases = [
            (Command::Get { policy: &read, key: &key, bins: None }, false),
            (Command::Exists { policy: &read, key: &key }, false),
            (Command::Delete { policy: &write, key: &key }, true),
            (Command::Touch { policy: &write, key: &key }, true),
            (Command::Operate { policy: &write, key: &key, ops: &reads }, false),
            (Command::Operate { policy: &write, key: &key, ops: &writes }, true),
        ];
        for (command, expected) in cases {
            assert_eq!(command.is_write(), expected, "{:?}", command.kind());
        }
    }

    #[test]
    fn exists_and_delete_collapse_to_flags() {
        let read = ReadPolicy::default();
        let write = WritePolicy::default();
        let key = Key::new("test", "demo", "k");
        let exists = Command::Exists { policy: &read, key: &key };
        let delete = Command::Delete { policy: &write, key: &key };
        assert_eq!(decode(&exists, Row::ok(1, 0)).expect("exists"), CommandOutput::Flag(true));
        assert_eq!(
            decode(&exists, Row::code(result_code::KEY_NOT_FOUND)).expect("missing"),
            CommandOutput::Flag(false)
        );
        assert_eq!(
            decode(&delete, Row::code(result_code::KEY_NOT_FOUND)).expect("missing"),
            CommandOutput::Flag(false)
        );
    }

    #[test]
    fn operate_with_writes_rejects_missing_key() {
        let policy = WritePolicy::default();
        let key = Key::new("test", "demo", "k");
        let ops = [Operation::add(Bin::new("n", 1i64)), Operation::get("n")];
        let command = Command::Operate { policy: &policy, key: &key, ops: &ops };
        let err = decode(&command, Row::code(result_code::KEY_NOT_FOUND)).expect_err("missing");
        assert_eq!(err.result_code(), result_code::KEY_NOT_FOUND);

        let reads = [Operation::get("n")];
        let command = Command::Operate { policy: &policy, key: &key, ops: &reads };
        assert_eq!(
            decode(&command, Row::code(result_code::KEY_NOT_FOUND)).expect("read"),
            CommandOutput::Record(None)
        );
    }

    #[test]
    fn execute_returns_success_bin() {
        let policy = WritePolicy::default();
        let key = Key::new("test", "demo", "k");
        let command = Command::Execute {
            policy: &policy,
            key: &key,
            package: "pkg",
            function: "fn",
            args: &[],
        };
        let out = decode(&command, Row::ok(1, 0).bin("SUCCESS", fixtures::int(7))).expect("udf");
        assert_eq!(out, CommandOutput::UdfResult(Some(Value::Int(7))));

        let err = decode(
            &command,
            Row::code(result_code::UDF_BAD_RESPONSE)
                .bin("FAILURE", fixtures::string("file:line:100:custom message")),
        )
        .expect_err("failure");
        assert_eq!(err.result_code(), 100);
        assert_eq!(err.message(), Some("file:line custom message"));
    }

    #[test]
    fn filtered_out_honors_policy() {
        let mut policy = ReadPolicy::default();
        let key = Key::new("test", "demo", "k");
        let get = Command::Get { policy: &policy, key: &key, bins: None };
        assert_eq!(
            decode(&get, Row::code(result_code::FILTERED_OUT)).expect("tolerated"),
            CommandOutput::Record(None)
        );
        policy.base.fail_on_filtered_out = true;
        let get = Command::Get { policy: &policy, key: &key, bins: None };
        let err = decode(&get, Row::code(result_code::FILTERED_OUT)).expect_err("fails");
        assert_eq!(err.kind(), ErrorKind::Result);
    }
}
