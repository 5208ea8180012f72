//! Purpose: `kvgate` CLI entry point for offline inspection of proxy payloads and tokens.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value as JsonValue, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use kvgate::api::{Error, ErrorKind, Value, parse_claims, to_exit_code};
use kvgate::core::classify::Classifier;
use kvgate::core::cursor::{CallContext, unary_reader};
use kvgate::core::decoder::{self, MessageHeader, RecordCursor};
use kvgate::core::envelope::ProxyResponse;
use kvgate::core::record::Record;

#[derive(Parser)]
#[command(
    name = "kvgate",
    version,
    about = "Inspect record-database proxy payloads and access tokens",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Decode a captured native response payload",
        long_about = r#"Decode a captured native response payload and print its records as JSON.

Without --stream the file holds one unary reply (one record). With --stream it
holds the concatenated payload of a batch/query/scan stream; every row is printed
until the terminating row."#,
        after_help = r#"EXAMPLES
  $ kvgate decode reply.bin
  $ kvgate decode --stream batch.bin"#
    )]
    Decode {
        #[arg(help = "Payload file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Treat the file as a multi-row stream payload")]
        stream: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Show the validity window of an access token",
        after_help = r#"EXAMPLES
  $ kvgate token eyJhbGciOi...."#
    )]
    Token {
        #[arg(help = "Access token as issued by the gateway")]
        token: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ kvgate completion bash > ~/.local/share/bash-completion/completions/kvgate
  $ kvgate completion zsh > ~/.zfunc/_kvgate"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Client)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                let message = err.render().to_string();
                let summary = message.lines().next().unwrap_or("invalid arguments");
                return Err(Error::new(ErrorKind::Client)
                    .with_message(summary.trim_start_matches("error: ").to_string()));
            }
        },
    };

    match cli.command {
        Command::Decode { file, stream } => {
            let value = decode_file(&file, stream)?;
            emit_json(&value)?;
        }
        Command::Token { token } => {
            emit_json(&token_json(&token)?)?;
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "kvgate", &mut io::stdout());
        }
    }
    Ok(0)
}

fn decode_file(path: &Path, stream: bool) -> Result<JsonValue, Error> {
    let bytes = std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Client)
            .with_message(format!("failed to read {}", path.display()))
            .with_source(err)
    })?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Client)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    let rows = runtime.block_on(decode_payload(Bytes::from(bytes), stream))?;
    if stream {
        Ok(json!({ "rows": rows }))
    } else {
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::Parse).with_message("payload holds no record"))
    }
}

async fn decode_payload(payload: Bytes, stream: bool) -> Result<Vec<JsonValue>, Error> {
    let mut reader = unary_reader(
        ProxyResponse::last(payload),
        CallContext::default(),
        Classifier::default(),
    );
    let mut rows = Vec::new();
    while let Some(body) = reader.read_group().await? {
        let mut cursor = RecordCursor::new(body);
        while cursor.remaining() > 0 {
            let header = MessageHeader::parse(&mut cursor)?;
            if header.is_last() {
                return Ok(rows);
            }
            let key = decoder::parse_key(&mut cursor, header.field_count)?;
            let record = decoder::parse_record(
                &mut cursor,
                header.op_count,
                header.generation,
                header.expiration,
            )?;
            let mut row = row_json(&header, &record, stream);
            if let (Some(digest), Some(object)) = (key.digest, row.as_object_mut()) {
                object.insert("digest".to_string(), json!(hex(&digest)));
            }
            rows.push(row);
            if !stream {
                return Ok(rows);
            }
        }
    }
    Ok(rows)
}

fn row_json(header: &MessageHeader, record: &Record, stream: bool) -> JsonValue {
    let mut object = Map::new();
    if stream {
        object.insert("index".to_string(), json!(header.batch_index));
    }
    object.insert("result_code".to_string(), json!(header.result_code));
    if header.is_partition_done() {
        object.insert("partition_done".to_string(), json!(header.generation));
        return JsonValue::Object(object);
    }
    object.insert("generation".to_string(), json!(record.generation));
    object.insert("expiration".to_string(), json!(record.expiration));
    let bins: Map<String, JsonValue> = record
        .bins
        .iter()
        .map(|(name, value)| (name.clone(), value_json(value)))
        .collect();
    object.insert("bins".to_string(), JsonValue::Object(bins));
    JsonValue::Object(object)
}

fn value_json(value: &Value) -> JsonValue {
    match value {
        Value::Nil => JsonValue::Null,
        Value::Bool(value) => json!(value),
        Value::Int(value) => json!(value),
        Value::Float(value) => json!(value),
        Value::String(value) => json!(value),
        Value::Blob(bytes) => json!({ "blob": STANDARD.encode(bytes) }),
        Value::GeoJson(geo) => json!({ "geojson": geo }),
        Value::Packed { particle, bytes } => json!({
            "particle": particle.as_u8(),
            "packed": STANDARD.encode(bytes),
        }),
        Value::List(values) => JsonValue::Array(values.iter().map(value_json).collect()),
    }
}

fn token_json(token: &str) -> Result<JsonValue, Error> {
    let claims = parse_claims(token)?;
    Ok(json!({
        "iat": claims.iat,
        "exp": claims.exp,
        "ttl_ms": claims.ttl().as_millis() as u64,
        "issued_at": rfc3339(claims.iat),
        "expires_at": rfc3339(claims.exp),
    }))
}

fn rfc3339(seconds: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn emit_json(value: &JsonValue) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(value).map_err(|err| {
        Error::new(ErrorKind::Serialize)
            .with_message("failed to encode json")
            .with_source(err)
    })?;
    println!("{json}");
    Ok(())
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Client\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> JsonValue {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("result_code".to_string(), json!(err.result_code()));
    inner.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if err.in_doubt() {
        inner.insert("in_doubt".to_string(), json!(true));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    let mut outer = Map::new();
    outer.insert("error".to_string(), JsonValue::Object(inner));
    JsonValue::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}
