//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;

use crate::case::TestCase;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::identity::TestIdentity;
use crate::output::{self, OutputRecord};
use crate::render::TemplateParams;
use crate::run::RunOptions;

use super::{CliError, CliResult, ExitCode};

/// Arguments of `pcap-harness replay`.
#[derive(Debug, Default)]
pub struct ReplayRequest {
    pub capture: PathBuf,
    pub id: Option<String>,
    pub template: Option<String>,
    pub params: Vec<String>,
    pub args: Vec<String>,
    pub debug: Vec<String>,
    pub timeout: Option<Duration>,
}

// ============================================================================
// replay
// ============================================================================

/// Render the config, replay one capture and print its records as NDJSON.
pub fn replay(config: HarnessConfig, request: ReplayRequest) -> CliResult<ExitCode> {
    let identity = replay_identity(&request)?;
    let params = parse_params(&request.params)?;

    let case = TestCase::setup_with(config, identity).map_err(harness_failure)?;
    let template = request
        .template
        .clone()
        .unwrap_or_else(|| case.config().default_template_name());
    case.render_config(&template, case.config().default_config_name(), &params)
        .map_err(harness_failure)?;

    let mut options = RunOptions::new()
        .extra_args(request.args.iter().cloned())
        .debug_selectors(request.debug.iter().cloned());
    if let Some(limit) = request.timeout {
        options = options.timeout(limit);
    }

    let outcome = case
        .run_analyzer_with(&request.capture, &options)
        .map_err(harness_failure)?;

    let output_path = case.workdir().join(case.config().default_output_path());
    let records = if output_path.exists() {
        output::read_output(&output_path).map_err(harness_failure)?
    } else {
        tracing::warn!(path = %output_path.display(), "analyzer produced no output file");
        Vec::new()
    };

    for record in &records {
        println!("{}", record);
    }
    eprintln!(
        "{}: {} ({} records in {:.2}s, log: {})",
        case.workdir().identity(),
        outcome.status,
        records.len(),
        outcome.duration.as_secs_f64(),
        outcome.log_path.display()
    );

    if outcome.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode(outcome.status.code().unwrap_or(ExitCode::FAILURE.0)))
    }
}

fn replay_identity(request: &ReplayRequest) -> CliResult<TestIdentity> {
    let name = match &request.id {
        Some(id) => id.clone(),
        None => {
            let stem = request
                .capture
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "capture".to_string());
            format!("replay.{}", stem)
        }
    };
    TestIdentity::new(name).map_err(harness_failure)
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type;
/// anything else is taken as a plain string.
pub fn parse_params(raw: &[String]) -> CliResult<TemplateParams> {
    let mut params = TemplateParams::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::with_code(
                format!("Error: template parameter '{}' is not of the form KEY=VALUE", pair),
                ExitCode::ERROR.0,
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::with_code(
                format!("Error: template parameter '{}' has an empty name", pair),
                ExitCode::ERROR.0,
            ));
        }
        let value = serde_json::from_str::<serde_json::Value>(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key, value);
    }
    Ok(params)
}

// ============================================================================
// records / grep
// ============================================================================

/// Print every record of an output file, one per line (or pretty-printed).
pub fn print_records(file: &Path, pretty: bool) -> CliResult<ExitCode> {
    let records = output::read_output(file).map_err(harness_failure)?;
    for record in &records {
        println!("{}", format_record(record, pretty)?);
    }
    tracing::debug!(file = %file.display(), records = records.len(), "printed records");
    Ok(ExitCode::SUCCESS)
}

fn format_record(record: &OutputRecord, pretty: bool) -> CliResult<String> {
    if pretty {
        serde_json::to_string_pretty(record)
            .map_err(|e| CliError::with_code(format!("Error formatting record: {}", e), ExitCode::ERROR.0))
    } else {
        Ok(record.to_string())
    }
}

/// Exit 0 if `text` appears on a line of `log`, 1 if it does not.
pub fn grep_log(log: &Path, text: &str) -> CliResult<ExitCode> {
    if crate::log::log_contains(log, text).map_err(harness_failure)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Harness error as a CLI message, with the diagnostic code and help attached.
fn harness_failure(err: HarnessError) -> CliError {
    let mut message = format!("Error: {}", err);
    if let Some(code) = err.code() {
        message.push_str(&format!(" [{}]", code));
    }
    if let Some(help) = err.help() {
        message.push_str(&format!("\n  help: {}", help));
    }
    CliError::with_code(message, ExitCode::ERROR.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ========================================================================
    // parse_params
    // ========================================================================

    #[test]
    fn test_params_keep_json_types() {
        let params = parse_params(&strings(&["ports=[6379, 6380]", "send_request=true", "max_rows=10"])).unwrap();
        assert_eq!(params.get("ports"), Some(&json!([6379, 6380])));
        assert_eq!(params.get("send_request"), Some(&json!(true)));
        assert_eq!(params.get("max_rows"), Some(&json!(10)));
    }

    #[test]
    fn test_params_fall_back_to_strings() {
        let params = parse_params(&strings(&["iface=lo", "filter=tcp port 80", "empty="])).unwrap();
        assert_eq!(params.get("iface"), Some(&json!("lo")));
        assert_eq!(params.get("filter"), Some(&json!("tcp port 80")));
        assert_eq!(params.get("empty"), Some(&json!("")));
    }

    #[test]
    fn test_params_split_on_first_equals() {
        let params = parse_params(&strings(&["query=a=b"])).unwrap();
        assert_eq!(params.get("query"), Some(&json!("a=b")));
    }

    #[test]
    fn test_malformed_params_are_rejected() {
        let err = parse_params(&strings(&["no_equals_sign"])).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::ERROR);
        assert!(parse_params(&strings(&["=1"])).is_err());
    }

    // ========================================================================
    // identities
    // ========================================================================

    #[test]
    fn test_replay_identity_defaults_to_capture_stem() {
        let request = ReplayRequest {
            capture: PathBuf::from("mysql/mysql_long_result.pcap"),
            ..Default::default()
        };
        assert_eq!(replay_identity(&request).unwrap().as_str(), "replay.mysql_long_result");

        let request = ReplayRequest {
            capture: PathBuf::from("x.pcap"),
            id: Some("manual::gap".to_string()),
            ..Default::default()
        };
        assert_eq!(replay_identity(&request).unwrap().as_str(), "manual.gap");
    }

    // ========================================================================
    // records / grep
    // ========================================================================

    #[test]
    fn test_grep_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("packetbeat.log");
        fs::write(&log, "redis: connection reset\n").unwrap();

        assert_eq!(grep_log(&log, "connection reset").unwrap(), ExitCode::SUCCESS);
        assert_eq!(grep_log(&log, "gap in tcp stream").unwrap(), ExitCode::FAILURE);
        assert_eq!(
            grep_log(&dir.path().join("missing.log"), "x").unwrap_err().exit_code,
            ExitCode::ERROR
        );
    }

    #[test]
    fn test_records_decode_error_names_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("packetbeat");
        fs::write(&file, "{\"a\":1}\nnot json\n").unwrap();

        let err = print_records(&file, false).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::ERROR);
        assert!(err.message.contains("line 2"), "{}", err.message);
    }

    #[test]
    fn test_pretty_record_format() {
        let record = json!({"method": "GET"});
        insta::assert_snapshot!(format_record(&record, false).unwrap(), @r#"{"method":"GET"}"#);
        assert_eq!(format_record(&record, true).unwrap(), "{\n  \"method\": \"GET\"\n}");
    }
}
